//! Live View Synchronizer
//!
//! Loader, change-event reducer, mutation wrapper and subscription
//! lifecycle shared by every list/detail projection of the SDK.

pub mod collection;
pub mod event;
pub mod listener;
pub mod loader;
pub mod mutation;
pub mod subscription;
pub mod view;

pub use collection::{Applied, InsertAt, KeyedCollection, Row, ViewFilter, ViewOrder};
pub use event::{ChangeEvent, ChangeOp, EventKind};
pub use listener::{EmptyViewListener, ViewListener};
pub use loader::{LoadKind, Loader};
pub use mutation::{Mutator, Validate};
pub use subscription::{MountEpoch, Subscription, SubscriptionGuard};
pub use view::LiveView;
