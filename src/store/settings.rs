//! Settings and saved searches.

use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::store::data::{Search, SearchId};
use crate::store::Session;

fn search_from_row(row: &Row<'_>) -> rusqlite::Result<Search> {
    Ok(Search { id: row.get(0)?, name: row.get(1)?, query: row.get(2)? })
}

impl Session<'_> {
    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM Settings WHERE key = ?1", [key], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO Settings (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Save a search under a new name and return its id.
    pub fn add_search(&self, name: &str, query: &str) -> Result<SearchId> {
        self.conn()
            .execute("INSERT INTO Searches (name, query) VALUES (?1, ?2)", params![name, query])?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn update_search(&self, id: SearchId, name: &str, query: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE Searches SET name = ?1, query = ?2 WHERE id = ?3",
            params![name, query, id],
        )?;
        Ok(())
    }

    pub fn delete_search(&self, id: SearchId) -> Result<()> {
        self.conn().execute("DELETE FROM Searches WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn search(&self, id: SearchId) -> Result<Option<Search>> {
        Ok(self
            .conn()
            .query_row("SELECT id, name, query FROM Searches WHERE id = ?1", [id], search_from_row)
            .optional()?)
    }

    pub fn searches(&self) -> Result<Vec<Search>> {
        let mut stmt = self.conn().prepare("SELECT id, name, query FROM Searches ORDER BY name")?;
        let searches = stmt.query_map([], search_from_row)?;
        Ok(searches.collect::<rusqlite::Result<_>>()?)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::{Store, SCHEMA_VERSION};

    #[test]
    fn test_settings_overwrite() {
        let store = Store::open_in_memory().unwrap();
        store
            .session(|s| {
                assert_eq!(s.setting("DBVersion")?.as_deref(), Some(SCHEMA_VERSION));
                assert_eq!(s.setting("missing")?, None);
                s.set_setting("Locale", "en")?;
                s.set_setting("Locale", "de")?;
                assert_eq!(s.setting("Locale")?.as_deref(), Some("de"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_search_crud() {
        let store = Store::open_in_memory().unwrap();
        store
            .session(|s| {
                let id = s.add_search("Beach", r#"{"text":"beach"}"#)?;
                assert!(s.add_search("Beach", "{}").is_err());

                s.update_search(id, "Sea", r#"{"text":"sea"}"#)?;
                let search = s.search(id)?.unwrap();
                assert_eq!(search.name, "Sea");
                assert_eq!(s.searches()?.len(), 1);

                s.delete_search(id)?;
                assert!(s.search(id)?.is_none());
                Ok(())
            })
            .unwrap();
    }
}
