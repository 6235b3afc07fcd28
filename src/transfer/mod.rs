//!
//! jsh transfer orchestration
//! --------------------------
//! Copy commands are resolved locally: the arguments decide the direction, the
//! catalogue grants one envelope per replica through `access`, and the transfer
//! engine moves the bytes. Downloads go through a temporary metalink manifest
//! listing every replica. Uploads write every replica as a separate job, and
//! only the replicas that were written are committed back to the catalogue.

mod engine;
mod manifest;
mod orchestrator;
mod paths;

pub use engine::{
    CopyOptions, JobStatus, JobStatusKind, TransferDescriptor, TransferEngine, TransferEvent, TransferJob, XrdcpEngine,
    EVENT_CHANNEL_CAPACITY,
};
pub use manifest::Manifest;
pub use orchestrator::{
    authorizations_from_reply, authz_from_url, copy, plan_download, plan_upload, CopyContext, CopyReport, JobOutcome,
    JobPlan, ReplicaAuthorization,
};
pub use paths::{is_local, normalize_local, plan_copy, CopyPlan, Direction, LOCAL_PREFIX};
