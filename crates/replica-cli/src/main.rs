//! Thin entrypoint for the `replica` binary.

#[tokio::main]
async fn main() {
    let exit_code = replica_cli::run().await;
    std::process::exit(exit_code);
}
