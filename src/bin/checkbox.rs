use anyhow::Result;

fn main() -> Result<()> {
    checkbox::cli::run()
}
