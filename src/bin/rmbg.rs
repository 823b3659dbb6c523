//! rmbg background replacement CLI
//!
//! Cuts the foreground out of an image and composes it over a new background
//! using the rmbg library.

#[cfg(feature = "cli")]
use rmbg::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
