//! File outputs for harvest reports.
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! └── 2024-02-01/
//!     ├── some_handle.json
//!     └── other_handle.json
//! ```

pub mod json;
