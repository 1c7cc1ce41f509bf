//! Pluggable extension API capability.

use crate::error::Result;
use crate::meta::Meta;
use async_trait::async_trait;
use serde_json::Value;

/// A named extension API registered with the VFS.
///
/// The worker exposes each API to the peer as `{name, names[]}` and routes
/// `call(name, fn, args)` invocations through [`VfsApi::call`]; results are
/// marshalled exactly like operation callbacks, so an API may return live
/// resources.
#[async_trait]
pub trait VfsApi: Send {
    /// The API's registered name.
    fn name(&self) -> &str;

    /// The callable method names the API exposes.
    fn method_names(&self) -> Vec<String>;

    /// Invokes a method with JSON arguments.
    async fn call(&mut self, fn_name: &str, args: Vec<Value>) -> Result<Meta>;
}
