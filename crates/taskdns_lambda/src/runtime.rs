pub use taskdns_core::{attrs, codec, events, record};
