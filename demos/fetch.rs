//! Fetch a URI and print its contents.
//!
//! ```sh
//! cargo run --example fetch -- https://example.com/
//! ```

use std::io::Write as _;

use rivulet::task::Executor;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com/".to_owned());

    let body = Executor::block_on(rivulet::slurp(&uri))?;
    std::io::stdout().write_all(&body)?;
    Ok(())
}
