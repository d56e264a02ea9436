pub mod assignment;
pub mod catalog;
pub mod eligibility;
pub mod error;
pub mod facade;
pub mod geometry;
pub mod remote;
pub mod spatial;
pub mod temporal;
pub mod worker;

pub use assignment::{AssignmentDelta, AssignmentStore, HealResult, HistoryStep, ShatterDelta};
pub use error::{GeometryError, RemoteError, ZoneError};
pub use facade::{ChildFetch, PlanSummary, QueryFacade, UnassignedQuery};
pub use geometry::{DissolveResult, GeometryEngine, UnassignedResult};
pub use remote::{RemoteFuture, RemoteStore};
pub use spatial::SpatialIndex;
pub use temporal::TemporalController;
pub use worker::{GeometryClient, GeometryOp};
