//! # Repo Lens
//!
//! Chat with any git repository. Repo Lens ingests a codebase into SQLite
//! and exposes it to a language-model agent through three virtualized shell
//! tools — no checkout sticks around on disk; every "shell command" is an
//! indexed SQL query.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────────┐
//! │  git clone    │──▶│  Ingestion  │──▶│    SQLite      │
//! │  (transient)  │   │ walk+filter │   │ files + trigram│
//! └──────────────┘   └─────────────┘   └──────┬────────┘
//!                                             │
//!                       ┌─────────────────────┤
//!                       ▼                     ▼
//!                 ┌───────────┐        ┌────────────┐
//!                 │ Shell     │◀──────│ Agent loop  │◀──▶ model provider
//!                 │ tools     │ calls │ (streaming) │
//!                 └───────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rlens init                                    # create database
//! rlens ingest https://github.com/org/repo      # index a repository
//! rlens ask <repo-id> "How does auth work?"     # agentic Q&A
//! rlens serve                                   # HTTP API + SSE chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Repository / file-tree row types |
//! | [`ingest`] | Clone, walk, filter, bulk-load |
//! | [`shell`] | The three virtual shell operations |
//! | [`search`] | Hybrid trigram-narrowing + regex search |
//! | [`tools`] | Tool trait, registry, model-facing schemas |
//! | [`provider`] | Model-provider capability + OpenAI-compatible client |
//! | [`agent`] | Streaming tool-calling loop |
//! | [`repos`] | Repository listing and deletion |
//! | [`server`] | HTTP API with SSE chat |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod repos;
pub mod search;
pub mod server;
pub mod shell;
pub mod tools;
