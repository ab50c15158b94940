//! SQL placeholder dialects.
//!
//! The engine behind the generic driver is known from the connection URL,
//! so the placeholder style is fixed once when the store is built.
//! Statements are written once with `?` placeholders and rendered per
//! dialect.

use crate::error::{Error, Result};

/// Bind-parameter convention of the target engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?` placeholders (SQLite, MySQL).
    Positional,
    /// `$1`, `$2`, ... placeholders (Postgres).
    Numbered,
}

impl Dialect {
    /// Resolve the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Numbered),
            "sqlite" | "mysql" | "mariadb" => Ok(Dialect::Positional),
            other => Err(Error::Config(format!(
                "unsupported database scheme {other:?} in connection url"
            ))),
        }
    }

    /// Render a `?`-placeholder template for this dialect.
    pub fn render(self, template: &str) -> String {
        match self {
            Dialect::Positional => template.to_string(),
            Dialect::Numbered => {
                let mut out = String::with_capacity(template.len() + 8);
                let mut n = 0;
                for ch in template.chars() {
                    if ch == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
        }
    }

    /// Server-side "now" expression for the text `updated_at` column.
    pub fn now_expr(self) -> &'static str {
        match self {
            Dialect::Positional => "CURRENT_TIMESTAMP",
            Dialect::Numbered => "CAST(NOW() AS TEXT)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_dialect_from_scheme() {
        assert_eq!(
            Dialect::from_url("postgres://u:p@localhost/db").unwrap(),
            Dialect::Numbered
        );
        assert_eq!(
            Dialect::from_url("postgresql://localhost/db").unwrap(),
            Dialect::Numbered
        );
        assert_eq!(
            Dialect::from_url("sqlite::memory:").unwrap(),
            Dialect::Positional
        );
        assert_eq!(
            Dialect::from_url("mysql://root@localhost/db").unwrap(),
            Dialect::Positional
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(
            Dialect::from_url("mssql://localhost"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn numbered_render_counts_placeholders() {
        let sql = "UPDATE t SET a = ?, b = ? WHERE id = ?";
        assert_eq!(
            Dialect::Numbered.render(sql),
            "UPDATE t SET a = $1, b = $2 WHERE id = $3"
        );
        assert_eq!(Dialect::Positional.render(sql), sql);
    }
}
