//! # photo-dedup CLI
//!
//! Command-line interface for the resumable duplicate finder.
//!
//! ## Usage
//! ```bash
//! photo-dedup scan ~/Photos --workers 8
//! photo-dedup status
//! photo-dedup groups --output json
//! ```

mod cli;

use resumable_photo_dedup::Result;

fn main() -> Result<()> {
    cli::run()
}
