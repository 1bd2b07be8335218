//! # Events Module
//!
//! Event-driven progress reporting.
//!
//! The coordinator publishes events through a channel so any front end
//! (the bundled CLI, a GUI, a log shipper) can follow a long run without
//! polling the checkpoint.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         if let Event::Compare(CompareEvent::Progress(p)) = event {
//!             println!("{}/{} pairs", p.pairs_resolved, p.pairs_total);
//!         }
//!     }
//! });
//!
//! let outcome = Engine::builder().config(config).events(sender).build()?.run()?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
