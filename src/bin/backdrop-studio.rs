//! Backdrop Studio CLI
//!
//! Normalizes a product photo onto a square canvas, masks the product and has a
//! hosted inpainting model paint a new scene around it.

#[cfg(feature = "cli")]
use backdrop_studio::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
