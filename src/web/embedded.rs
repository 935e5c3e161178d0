use rust_embed::RustEmbed;

/// Browser client served at `/` and `/static/*`.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/static"]
pub struct Assets;
