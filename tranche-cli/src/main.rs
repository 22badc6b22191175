use anyhow::Result;

fn main() -> Result<()> {
    tranche_cli::run()
}
