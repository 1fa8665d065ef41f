//! A2A (Agent-to-Agent) delegation for skillbridge
//!
//! Specialist side: [`A2aServer`] serves the agent card and runs each
//! submitted task through a [`TaskManager`], which drives one tool server
//! process per task. Host side: [`A2aClient`] and [`HostAgent`].

pub mod client;
pub mod host;
pub mod protocol;
pub mod server;
pub mod task_manager;
pub mod tool;

pub use client::{A2aClient, A2aClientError};
pub use host::{DelegationOutcome, HostAgent, IntentResolver, KeywordResolver};
pub use protocol::{AgentCard, Task, TaskSendParams, TaskState};
pub use server::{A2aServer, build_agent_card};
pub use task_manager::{Invocation, TaskManager};
pub use tool::DelegateToSpecialistTool;
