//! Foreign-key relationships of one table
//!
//! The engine returns every edge touching the table from a single catalog snapshot; this module
//! splits them by direction. A self-referencing constraint is both outgoing and incoming.

use serde::Serialize;
use std::time::Duration;

use crate::engine::{EngineConnection, ForeignKeyEdge, QualifiedName};
use crate::error::Result;
use crate::introspect::qualify;
use crate::pool::{ManageConnection, Pool};

/// Edges leaving and entering one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Relationships {
    /// Edges whose source column belongs to the table
    pub outgoing: Vec<ForeignKeyEdge>,

    /// Edges whose target column belongs to the table
    pub incoming: Vec<ForeignKeyEdge>,
}

impl Relationships {
    /// Split `edges` by direction relative to `table`, keeping their order
    #[must_use]
    pub fn partition(table: &QualifiedName, edges: Vec<ForeignKeyEdge>) -> Self {
        let mut relationships = Self::default();
        for edge in edges {
            let outgoing = edge.source.belongs_to(table);
            let incoming = edge.target.belongs_to(table);
            match (outgoing, incoming) {
                (true, true) => {
                    relationships.outgoing.push(edge.clone());
                    relationships.incoming.push(edge);
                }
                (true, false) => relationships.outgoing.push(edge),
                (false, true) => relationships.incoming.push(edge),
                (false, false) => {}
            }
        }
        relationships
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_empty()
    }
}

pub struct RelationshipResolver<M: ManageConnection> {
    pool: Pool<M>,
    acquire_timeout: Duration,
}

impl<M> RelationshipResolver<M>
where
    M: ManageConnection,
    M::Connection: EngineConnection,
{
    pub const fn new(pool: Pool<M>, acquire_timeout: Duration) -> Self {
        Self { pool, acquire_timeout }
    }

    /// `NotFound` when the table does not exist
    pub async fn relationships(&self, schema: Option<&str>, table: &str) -> Result<Relationships> {
        let mut conn = self.pool.acquire(self.acquire_timeout).await?;
        let name = qualify(&mut *conn, schema, table).await?;
        let edges = conn.foreign_key_edges(&name).await?;
        Ok(Relationships::partition(&name, edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ColumnRef;
    use crate::testing::{MockCatalog, MockManager};
    use pretty_assertions::assert_eq;

    fn edge(name: &str, source: (&str, &str), target: (&str, &str)) -> ForeignKeyEdge {
        ForeignKeyEdge {
            constraint_name: name.to_string(),
            source: ColumnRef::new("public", source.0, source.1),
            target: ColumnRef::new("public", target.0, target.1),
        }
    }

    #[test]
    fn test_partition_by_direction() {
        let table = QualifiedName::new("public", "employees");
        let edges = vec![
            edge("employees_dept_fk", ("employees", "dept_id"), ("departments", "id")),
            edge("employees_manager_fk", ("employees", "manager_id"), ("employees", "id")),
            edge("reviews_employee_fk", ("reviews", "employee_id"), ("employees", "id")),
        ];

        let rel = Relationships::partition(&table, edges);
        let outgoing: Vec<&str> = rel.outgoing.iter().map(|e| e.constraint_name.as_str()).collect();
        let incoming: Vec<&str> = rel.incoming.iter().map(|e| e.constraint_name.as_str()).collect();
        assert_eq!(outgoing, vec!["employees_dept_fk", "employees_manager_fk"]);
        assert_eq!(incoming, vec!["employees_manager_fk", "reviews_employee_fk"]);
    }

    #[test]
    fn test_same_name_in_other_schema_is_ignored() {
        let table = QualifiedName::new("public", "orders");
        let other = ForeignKeyEdge {
            constraint_name: "fk".to_string(),
            source: ColumnRef::new("archive", "orders", "user_id"),
            target: ColumnRef::new("archive", "users", "id"),
        };
        assert!(Relationships::partition(&table, vec![other]).is_empty());
    }

    #[tokio::test]
    async fn test_resolver_reports_self_reference_both_ways() {
        let catalog = MockCatalog::default()
            .with_table("public", "employees", &[("id", "integer"), ("manager_id", "integer")])
            .with_edge(
                "employees_manager_fk",
                ("public", "employees", "manager_id"),
                ("public", "employees", "id"),
            );
        let resolver = RelationshipResolver::new(
            Pool::new(MockManager::new(catalog), 1).unwrap(),
            Duration::from_secs(1),
        );

        let rel = resolver.relationships(None, "employees").await.unwrap();
        assert_eq!(rel.outgoing.len(), 1);
        assert_eq!(rel.incoming.len(), 1);
        assert_eq!(rel.outgoing[0], rel.incoming[0]);
    }

    #[tokio::test]
    async fn test_resolver_missing_table() {
        let resolver = RelationshipResolver::new(
            Pool::new(MockManager::new(MockCatalog::default()), 1).unwrap(),
            Duration::from_secs(1),
        );
        let err = resolver.relationships(Some("public"), "nope").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
