// Git-backed storage: primitives, merge policy, recovery, sync.

pub mod credentials;
pub mod merge;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod sync;
pub mod worker;
pub mod working_copy;
