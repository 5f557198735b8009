//! # Forge Memory
//!
//! An incrementally-updated hybrid search index over a project's markdown
//! memory: project notes, per-session logs and per-agent notes.
//!
//! Markdown files are split into heading-scoped chunks, embedded, and stored
//! in SQLite next to an FTS5 lexical mirror. Queries combine vector
//! similarity and keyword relevance into one ranked list.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌───────────┐
//! │  .forge/    │──▶│  Sync       │──▶│  SQLite   │
//! │  memory/*.md│   │ Chunk+Embed │   │ FTS5+Vec  │
//! └─────────────┘   └─────────────┘   └────┬──────┘
//!                                          │
//!                                          ▼
//!                                    ┌───────────┐
//!                                    │  Search   │
//!                                    │ (hybrid)  │
//!                                    └───────────┘
//! ```
//!
//! ## Directory Layout
//!
//! ```text
//! <project>/.forge/memory/
//!     MEMORY.md              project memory      (namespace "project")
//!     sessions/2024-03-09.md session logs        (namespace "session")
//!     agents/dev.md          agent notes         (namespace "agent", agent "dev")
//!     config.toml            optional settings
//!     index.sqlite           the index
//! <project>/docs/**.md       auxiliary docs      (namespace "project")
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and project-root discovery |
//! | [`models`] | Core data types |
//! | [`chunk`] | Markdown-aware chunking |
//! | [`scan`] | File discovery, namespaces and hashing |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`store`] | Index reads and the transactional write path |
//! | [`sync`] | Disk-to-index reconciliation |
//! | [`search`] | Hybrid search with score fusion |
//! | [`session_log`] | Session log writer |
//! | [`consolidate`] | Session log consolidation into `MEMORY.md` |
//! | [`status`] | Index statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation and metadata checks |

pub mod chunk;
pub mod config;
pub mod consolidate;
pub mod db;
pub mod embedding;
pub mod error;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod scan;
pub mod search;
pub mod session_log;
pub mod status;
pub mod store;
pub mod sync;
