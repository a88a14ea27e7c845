//! Document loading pipeline: fetch XML, resolve its `xml-stylesheet`
//! reference, apply the stylesheet and swap the result into a page element.

pub mod animate;
pub mod controller;
pub mod document;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetch;

pub use animate::Animator;
pub use animate::InstantAnimator;
pub use animate::TimedAnimator;
pub use animate::Transition;
pub use controller::BoundElement;
pub use controller::ClickAction;
pub use controller::LoadController;
pub use controller::LoadOptions;
pub use controller::LoadOutcome;
pub use controller::LoadState;
pub use controller::ReloadPolicy;
pub use controller::SharedPage;
pub use controller::lock_page;
pub use document::StylesheetResolver;
pub use document::XmlDocument;
pub use engine::TransformEngine;
pub use error::LoadError;
pub use error::LoadErrorKind;
pub use events::ContentListener;
pub use events::EventBus;
pub use events::PageEvent;
pub use fetch::FetchedResource;
pub use fetch::Fetcher;
pub use fetch::NetFetcher;
pub use fetch::ResourceKind;
pub use fetch::StaticFetcher;
