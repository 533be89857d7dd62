//! Optimistic local state and its mutation records

mod mutation;
mod optimistic;

pub use mutation::{
    DispatchRequest, Mutation, MutationHandle, MutationStatus, Resolution, SyncOp,
};
pub use optimistic::OptimisticStore;
