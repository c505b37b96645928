use anyhow::Result;

fn main() -> Result<()> {
    topsql_bench::cli::execute()
}
