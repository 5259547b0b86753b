//! Shared fixtures: temporary SQLite databases seeded through a writable connection

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use querygate::{ConnectionConfig, DatabaseGateway, GatewayConfig};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A seeded database file, removed on drop
pub struct TempDb {
    path: PathBuf,
}

impl TempDb {
    pub fn new(sql: &str) -> Self {
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let file = format!("querygate_it_{}_{}.db", std::process::id(), id);
        let path = std::env::temp_dir().join(file);
        let _ = std::fs::remove_file(&path);

        let conn = rusqlite::Connection::open(&path).expect("create temp database");
        conn.execute_batch(sql).expect("seed temp database");
        Self { path }
    }

    pub fn library() -> Self {
        Self::new(LIBRARY)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run statements through a writable connection (the gateway never writes)
    pub fn write(&self, sql: &str) {
        let conn = rusqlite::Connection::open(&self.path).expect("open temp database");
        conn.execute_batch(sql).expect("write temp database");
    }

    pub fn gateway(&self) -> DatabaseGateway {
        self.gateway_with(GatewayConfig::default())
    }

    pub fn gateway_with(&self, config: GatewayConfig) -> DatabaseGateway {
        DatabaseGateway::connect(&ConnectionConfig::sqlite(self.path.clone()), config)
            .expect("gateway")
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Authors with a self-referencing mentor key, books referencing authors, 25 numbers and a view
pub const LIBRARY: &str = "
    CREATE TABLE authors (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        mentor_id INTEGER REFERENCES authors(id),
        country TEXT
    );
    CREATE TABLE books (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        author_id INTEGER NOT NULL REFERENCES authors(id),
        published INTEGER,
        price REAL DEFAULT 9.99
    );
    CREATE TABLE numbers (v INTEGER NOT NULL);
    CREATE VIEW recent_books AS SELECT id, title FROM books WHERE published >= 2020;

    INSERT INTO authors VALUES
        (1, 'Ada', NULL, 'UK'),
        (2, 'Grace', 1, 'US'),
        (3, 'Edsger', 1, NULL),
        (4, 'Barbara', 2, 'US');
    INSERT INTO books VALUES
        (1, 'Notes', 1, 1843, 5.0),
        (2, 'Compilers', 2, 1952, NULL),
        (3, 'Structured', 3, 2021, 12.5),
        (4, 'Abstraction', 4, 2022, NULL);
    WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 25)
    INSERT INTO numbers SELECT x FROM c;
";

/// Never terminates on its own
pub const ENDLESS_QUERY: &str =
    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT COUNT(*) FROM c";
