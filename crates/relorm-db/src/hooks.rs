//! Lifecycle hooks.
//!
//! An entity attaches a [`ModelHooks`] implementation to its declaration to
//! run code around writes and after loads. Every method has a no-op default.
//! An error returned from a `before_*` hook aborts the operation, and the
//! surrounding transaction is rolled back.

use relorm_core::OrmResult;

use crate::graph::{Graph, NodeId};

/// Callbacks invoked by the loading strategy.
///
/// # Examples
///
/// ```
/// use relorm_core::{OrmError, OrmResult};
/// use relorm_db::graph::{Graph, NodeId};
/// use relorm_db::hooks::ModelHooks;
///
/// struct UpperBrand;
///
/// impl ModelHooks for UpperBrand {
///     fn before_create(&self, graph: &mut Graph, node: NodeId) -> OrmResult<()> {
///         let brand = graph.get(node, "Brand").to_string().to_uppercase();
///         graph.set(node, "Brand", brand);
///         Ok(())
///     }
/// }
/// ```
pub trait ModelHooks: Send + Sync {
    /// Runs before the row is inserted.
    fn before_create(&self, graph: &mut Graph, node: NodeId) -> OrmResult<()> {
        let _ = (graph, node);
        Ok(())
    }

    /// Runs after the row and its relations are inserted.
    fn after_create(&self, graph: &mut Graph, node: NodeId) -> OrmResult<()> {
        let _ = (graph, node);
        Ok(())
    }

    /// Runs before the change-set is applied.
    fn before_update(&self, graph: &mut Graph, node: NodeId) -> OrmResult<()> {
        let _ = (graph, node);
        Ok(())
    }

    /// Runs after the change-set is applied.
    fn after_update(&self, graph: &mut Graph, node: NodeId) -> OrmResult<()> {
        let _ = (graph, node);
        Ok(())
    }

    /// Runs before the row is deleted.
    fn before_delete(&self, graph: &mut Graph, node: NodeId) -> OrmResult<()> {
        let _ = (graph, node);
        Ok(())
    }

    /// Runs after the row is deleted.
    fn after_delete(&self, graph: &mut Graph, node: NodeId) -> OrmResult<()> {
        let _ = (graph, node);
        Ok(())
    }

    /// Runs after the node and its relations are loaded.
    fn after_find(&self, graph: &mut Graph, node: NodeId) -> OrmResult<()> {
        let _ = (graph, node);
        Ok(())
    }

    /// Struct-level validation, run after the field rules pass.
    fn validate(&self, graph: &Graph, node: NodeId) -> OrmResult<()> {
        let _ = (graph, node);
        Ok(())
    }
}
