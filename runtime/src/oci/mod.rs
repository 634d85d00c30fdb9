//! OCI artifact handling for skills.
//!
//! Skills are stored as single-layer OCI artifacts in an image layout on
//! disk and exchanged with remote registries over the distribution API.
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    OCI Image Layout                          │
//! │                                                              │
//! │  store/                                                      │
//! │  ├── oci-layout           (OCI layout marker)               │
//! │  ├── index.json           (Tags → manifest descriptors)     │
//! │  ├── ingest/              (In-flight blob writes)           │
//! │  └── blobs/                                                 │
//! │      └── sha256/                                            │
//! │          ├── <manifest>   (Skill manifest + annotations)    │
//! │          ├── <config>     (Creation timestamp)              │
//! │          └── <layer>      (Skill directory as tar.gz)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod credentials;
pub mod digest;
pub mod layers;
pub mod layout;
pub mod manifest;
pub mod reference;
pub mod registry;
pub mod store;

pub use credentials::{ChainProvider, Credential, CredentialProvider, CredentialStore};
pub use digest::Digest;
pub use manifest::{Descriptor, ImageIndex, Manifest};
pub use reference::SkillReference;
pub use registry::{PushResult, RegistryClient};
pub use store::{Store, StoreUsage};
