use node::cli::Args;

fn main() -> anyhow::Result<()> {
    // A .env file is a dev convenience; absence is fine.
    let _ = dotenvy::dotenv();
    logger::init();

    let args = argh::from_env::<Args>();
    args.run()
}
