//! # Motoko RAG
//!
//! Retrieval-augmented question answering and code completion for the
//! Motoko language.
//!
//! Motoko source files and Markdown documentation are embedded into two
//! vector collections. At request time a question is embedded, the nearest
//! samples and doc sections are pulled from both collections, and a prompt
//! built from them goes to a hosted (or local) language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐
//! │ clone/ingest│──▶│ Chunk+Embed │──▶│  SQLite    │
//! │ .mo  .md    │   │             │   │ collections│
//! └─────────────┘   └─────────────┘   └─────┬──────┘
//!                                           │
//!                  ┌────────────────────────┤
//!                  ▼            ▼           ▼
//!             ┌────────┐  ┌──────────┐  ┌────────┐
//!             │  CLI   │  │   HTTP   │  │  MCP   │
//!             │ (mrag) │  │ chat/auth│  │ stdio  │
//!             └────────┘  └──────────┘  └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mrag init                      # create database
//! mrag clone                     # fetch sample repositories
//! mrag ingest all                # embed code and docs
//! mrag context "stable memory"   # inspect retrieval
//! mrag serve http                # chat + completion API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Request-scoped error type |
//! | [`models`] | Core data types |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector collections |
//! | [`retriever`] | Two-collection context retrieval |
//! | [`prompt`] | Prompt assembly |
//! | [`generation`] | Language model clients |
//! | [`reply`] | Answer / history note separation |
//! | [`rag`] | The retrieval and generation pipeline |
//! | [`accounts`] | Users and API keys |
//! | [`conversation`] | Conversation persistence |
//! | [`chat`] | Chat turns |
//! | [`server`] | HTTP API |
//! | [`auth_routes`] | Account and API key routes |
//! | [`completion_routes`] | Editor completion protocol |
//! | [`mcp`] | stdio MCP server |
//! | [`repos`] | Sample repository cloning |
//! | [`chunk`] | Markdown chunking |
//! | [`ingest`] | Collection ingestion |
//! | [`progress`] | Clone and ingest progress |
//! | [`search`] | `context` and `ask` commands |
//! | [`stats`] | Database statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod accounts;
pub mod auth_routes;
pub mod chat;
pub mod chunk;
pub mod completion_routes;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod prompt;
pub mod rag;
pub mod reply;
pub mod repos;
pub mod retriever;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
