use anyhow::Result;

fn main() -> Result<()> {
    drinkledger::run()?;
    Ok(())
}
