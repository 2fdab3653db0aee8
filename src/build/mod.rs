//! Asset build pipelines.
//!
//! Each asset class (styles, scripts, markup, assets) is built by a
//! [`Pipeline`]: files are discovered with a glob under the source root,
//! pushed through an ordered list of stages and written below the
//! distributable root.
//!
//! # Example
//!
//! ```ignore
//! use assetflow::build::{InitSourceMap, Pipeline, Rename};
//! use assetflow::build::scripts::MinifyScript;
//!
//! let dest = "public_html/dist/scripts";
//! let report = Pipeline::new("scripts", "public_html/src", "scripts/*.js", dest)
//!     .stage(InitSourceMap)
//!     .stage_if(mode.is_production(), MinifyScript)
//!     .concat("main.js")
//!     .stage(Rename::suffix(".min"))
//!     .run()?;
//! println!("{}", report.summary());
//! ```

pub mod assets;
pub mod context;
pub mod discovery;
pub mod mode;
pub mod package;
pub mod pipeline;
pub mod progress;
pub mod result;
pub mod scripts;
pub mod sourcemap;
pub mod styles;

pub use context::*;
pub use discovery::*;
pub use mode::*;
pub use pipeline::*;
pub use progress::*;
pub use result::*;
