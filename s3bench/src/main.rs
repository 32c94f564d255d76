use anyhow::Result;

fn main() -> Result<()> {
    s3bench::cli::execute()
}
