use barry_lib::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = barry_lib::run(cli).await {
        eprintln!("barry: {e}");
        std::process::exit(1);
    }
}
