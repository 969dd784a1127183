//! The two synchronization mechanisms every endpoint is built on.
//!
//! - **`queue`** – [`CommandQueue`](queue::CommandQueue), the single worker
//!   that serializes writes and state mutations.
//! - **`reader`** – [`ReaderLoop`](reader::ReaderLoop), one blocking line
//!   reader per socket with a guaranteed finalizer.

pub mod queue;
pub mod reader;
