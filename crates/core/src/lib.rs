//! `nexuscrm-core`: shared identity and entity building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod module;

pub use entity::{
    EmailCampaign, EmailList, Entity, Lead, Post, Project, SocialAccount, User, Workflow,
};
pub use error::{DomainError, DomainResult};
pub use id::{
    EmailCampaignId, EmailListId, EntityId, LeadId, PostId, ProjectId, SocialAccountId, UserId,
    WorkflowId,
};
pub use module::{ModuleKind, RootKind};
