// used for persistence
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use crate::bag::{DataBag, DataBagPtr};
use crate::bag_impl::{DataBagContent, DataBagImpl};
use crate::data_item::DataItem;
use crate::error::{DataBagError, Result};
use crate::object_id::ObjectId;

/// Where snapshots live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

/// What is known about a stored snapshot without loading it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub name: String,
    pub fingerprint: String,
    pub saved_at: DateTime<Utc>,
    pub triples: usize,
}

fn encode(item: &DataItem) -> Result<String> {
    Ok(serde_json::to_string(item)?)
}

fn decode(text: &str) -> Result<DataItem> {
    Ok(serde_json::from_str(text)?)
}

fn parse_id(text: &str) -> Result<ObjectId> {
    text.parse()
        .map_err(|e: DataBagError| DataBagError::Persistence(format!("bad object id '{}' in store: {}", text, e)))
}

fn triple_count(content: &DataBagContent) -> usize {
    content.attrs.values().map(Vec::len).sum::<usize>()
        + content.lists.iter().map(|(_, items)| items.len().max(1)).sum::<usize>()
        + content.dicts.iter().map(|(_, entries)| entries.len()).sum::<usize>()
        + content.schemas.iter().map(|(_, attrs)| attrs.len()).sum::<usize>()
}

// ------------- Persistence -------------
pub struct Persistor {
    db: Connection,
    mode: PersistenceMode,
}

impl Persistor {
    pub fn new(mode: PersistenceMode) -> Result<Persistor> {
        let db = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        // The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
        // debugging using an external tool like DBeaver impossible
        db.execute_batch(
            "
            create table if not exists Snapshot (
                Snapshot_Name text not null,
                Fingerprint text not null,
                SavedAt text not null,
                Triples integer not null,
                constraint referenceable_Snapshot_Name primary key (
                    Snapshot_Name
                )
            );-- STRICT;
            create table if not exists Attribute (
                Snapshot_Name text not null,
                Object text not null,
                Attribute text not null,
                Value text not null,
                constraint Attribute_in_Snapshot foreign key (
                    Snapshot_Name
                ) references Snapshot(Snapshot_Name),
                constraint unique_Attribute unique (
                    Snapshot_Name,
                    Object,
                    Attribute
                )
            );-- STRICT;
            create table if not exists ListItem (
                Snapshot_Name text not null,
                List text not null,
                Position integer null,
                Value text null,
                constraint ListItem_in_Snapshot foreign key (
                    Snapshot_Name
                ) references Snapshot(Snapshot_Name),
                constraint unique_ListItem unique (
                    Snapshot_Name,
                    List,
                    Position
                )
            );-- STRICT;
            create table if not exists DictEntry (
                Snapshot_Name text not null,
                Dict text not null,
                Key text not null,
                Value text not null,
                constraint DictEntry_in_Snapshot foreign key (
                    Snapshot_Name
                ) references Snapshot(Snapshot_Name),
                constraint unique_DictEntry unique (
                    Snapshot_Name,
                    Dict,
                    Key
                )
            );-- STRICT;
            create table if not exists SchemaAttribute (
                Snapshot_Name text not null,
                Schema text not null,
                Attribute text not null,
                Value text not null,
                constraint SchemaAttribute_in_Snapshot foreign key (
                    Snapshot_Name
                ) references Snapshot(Snapshot_Name),
                constraint unique_SchemaAttribute unique (
                    Snapshot_Name,
                    Schema,
                    Attribute
                )
            );-- STRICT;
            ",
        )?;
        Ok(Persistor { db, mode })
    }

    pub fn mode(&self) -> &PersistenceMode {
        &self.mode
    }

    /// Stores the visible content of `bag`, fallbacks included, under `name`.
    /// An existing snapshot with the same name is replaced.
    pub fn save_snapshot(&mut self, name: &str, bag: &DataBag) -> Result<SnapshotInfo> {
        let start = Instant::now();
        let content = bag.content()?;
        let info = SnapshotInfo {
            name: name.to_owned(),
            fingerprint: content.fingerprint(),
            saved_at: Utc::now(),
            triples: triple_count(&content),
        };
        let tx = self.db.transaction()?;
        for table in ["Attribute", "ListItem", "DictEntry", "SchemaAttribute", "Snapshot"] {
            tx.prepare_cached(&format!("delete from {} where Snapshot_Name = ?", table))?
                .execute(params![name])?;
        }
        tx.prepare_cached(
            "
            insert into Snapshot (
                Snapshot_Name,
                Fingerprint,
                SavedAt,
                Triples
            ) values (?, ?, ?, ?)
        ",
        )?
        .execute(params![name, &info.fingerprint, info.saved_at.to_rfc3339(), info.triples as i64])?;
        {
            let mut add_attribute = tx.prepare_cached(
                "
                insert into Attribute (
                    Snapshot_Name,
                    Object,
                    Attribute,
                    Value
                ) values (?, ?, ?, ?)
            ",
            )?;
            for (attr, values) in &content.attrs {
                for (object, value) in values {
                    add_attribute.execute(params![name, object.to_string(), attr, encode(value)?])?;
                }
            }
            let mut add_list_item = tx.prepare_cached(
                "
                insert into ListItem (
                    Snapshot_Name,
                    List,
                    Position,
                    Value
                ) values (?, ?, ?, ?)
            ",
            )?;
            for (list, items) in &content.lists {
                if items.is_empty() {
                    // an empty list is a single row without position
                    add_list_item.execute(params![name, list.to_string(), None::<i64>, None::<String>])?;
                }
                for (position, item) in items.iter().enumerate() {
                    add_list_item.execute(params![name, list.to_string(), position as i64, encode(item)?])?;
                }
            }
            let mut add_dict_entry = tx.prepare_cached(
                "
                insert into DictEntry (
                    Snapshot_Name,
                    Dict,
                    Key,
                    Value
                ) values (?, ?, ?, ?)
            ",
            )?;
            for (dict, entries) in &content.dicts {
                for (key, value) in entries {
                    add_dict_entry.execute(params![name, dict.to_string(), encode(key)?, encode(value)?])?;
                }
            }
            let mut add_schema_attribute = tx.prepare_cached(
                "
                insert into SchemaAttribute (
                    Snapshot_Name,
                    Schema,
                    Attribute,
                    Value
                ) values (?, ?, ?, ?)
            ",
            )?;
            for (schema, attrs) in &content.schemas {
                for (attr, value) in attrs {
                    add_schema_attribute.execute(params![name, schema.to_string(), attr, encode(value)?])?;
                }
            }
        }
        tx.commit()?;
        info!(
            ms = start.elapsed().as_millis() as u64,
            snapshot = name,
            triples = info.triples,
            "snapshot saved"
        );
        Ok(info)
    }

    pub fn snapshot_info(&self, name: &str) -> Result<Option<SnapshotInfo>> {
        let row = self
            .db
            .prepare_cached(
                "
                select Fingerprint, SavedAt, Triples
                    from Snapshot
                    where Snapshot_Name = ?
            ",
            )?
            .query_row(params![name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })
            .optional()?;
        let Some((fingerprint, saved_at, triples)) = row else {
            return Ok(None);
        };
        let saved_at = DateTime::parse_from_rfc3339(&saved_at)
            .map_err(|e| DataBagError::Persistence(format!("bad timestamp '{}': {}", saved_at, e)))?
            .with_timezone(&Utc);
        Ok(Some(SnapshotInfo {
            name: name.to_owned(),
            fingerprint,
            saved_at,
            triples: triples as usize,
        }))
    }

    /// Names of the stored snapshots, sorted.
    pub fn snapshots(&self) -> Result<Vec<String>> {
        let mut statement = self.db.prepare_cached(
            "
            select Snapshot_Name
                from Snapshot
                order by Snapshot_Name
        ",
        )?;
        let names = statement
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Restores the snapshot into a new mutable bag. The content must match
    /// the fingerprint recorded when it was saved.
    pub fn load_snapshot(&self, name: &str) -> Result<DataBagPtr> {
        let start = Instant::now();
        let Some(info) = self.snapshot_info(name)? else {
            return Err(DataBagError::Persistence(format!("no snapshot named '{}'", name)));
        };
        let content = self.read_content(name)?;
        // rebuilding sorts the content the same way saving did
        let store = DataBagImpl::from_content(&content)?;
        let fingerprint = store.extract_content().fingerprint();
        if fingerprint != info.fingerprint {
            warn!(snapshot = name, "snapshot fingerprint mismatch");
            return Err(DataBagError::Persistence(format!(
                "snapshot '{}' is corrupt: fingerprint {} does not match the recorded {}",
                name, fingerprint, info.fingerprint
            )));
        }
        info!(
            ms = start.elapsed().as_millis() as u64,
            snapshot = name,
            triples = info.triples,
            "snapshot loaded"
        );
        Ok(DataBag::from_impl(store))
    }

    fn read_content(&self, name: &str) -> Result<DataBagContent> {
        let mut content = DataBagContent::default();

        let mut all_attributes = self.db.prepare_cached(
            "
            select Object, Attribute, Value
                from Attribute
                where Snapshot_Name = ?
        ",
        )?;
        let mut rows = all_attributes.query(params![name])?;
        while let Some(row) = rows.next()? {
            let object: String = row.get(0)?;
            let attr: String = row.get(1)?;
            let value: String = row.get(2)?;
            content
                .attrs
                .entry(attr)
                .or_default()
                .push((parse_id(&object)?, decode(&value)?));
        }

        let mut all_list_items = self.db.prepare_cached(
            "
            select List, Position, Value
                from ListItem
                where Snapshot_Name = ?
                order by List, Position
        ",
        )?;
        let mut rows = all_list_items.query(params![name])?;
        while let Some(row) = rows.next()? {
            let list = parse_id(&row.get::<_, String>(0)?)?;
            let value: Option<String> = row.get(2)?;
            if content.lists.last().is_none_or(|(last, _)| *last != list) {
                content.lists.push((list, Vec::new()));
            }
            if let (Some(value), Some((_, items))) = (value, content.lists.last_mut()) {
                items.push(decode(&value)?);
            }
        }

        let mut all_dict_entries = self.db.prepare_cached(
            "
            select Dict, Key, Value
                from DictEntry
                where Snapshot_Name = ?
                order by Dict
        ",
        )?;
        let mut rows = all_dict_entries.query(params![name])?;
        while let Some(row) = rows.next()? {
            let dict = parse_id(&row.get::<_, String>(0)?)?;
            let entry = (decode(&row.get::<_, String>(1)?)?, decode(&row.get::<_, String>(2)?)?);
            match content.dicts.last_mut() {
                Some((last, entries)) if *last == dict => entries.push(entry),
                _ => content.dicts.push((dict, vec![entry])),
            }
        }

        let mut all_schema_attributes = self.db.prepare_cached(
            "
            select Schema, Attribute, Value
                from SchemaAttribute
                where Snapshot_Name = ?
                order by Schema
        ",
        )?;
        let mut rows = all_schema_attributes.query(params![name])?;
        while let Some(row) = rows.next()? {
            let schema = parse_id(&row.get::<_, String>(0)?)?;
            let entry = (row.get::<_, String>(1)?, decode(&row.get::<_, String>(2)?)?);
            match content.schemas.last_mut() {
                Some((last, attrs)) if *last == schema => attrs.push(entry),
                _ => content.schemas.push((schema, vec![entry])),
            }
        }
        Ok(content)
    }

    /// Removes the snapshot; true when it existed.
    pub fn delete_snapshot(&mut self, name: &str) -> Result<bool> {
        let tx = self.db.transaction()?;
        for table in ["Attribute", "ListItem", "DictEntry", "SchemaAttribute"] {
            tx.prepare_cached(&format!("delete from {} where Snapshot_Name = ?", table))?
                .execute(params![name])?;
        }
        let deleted = tx
            .prepare_cached("delete from Snapshot where Snapshot_Name = ?")?
            .execute(params![name])?;
        tx.commit()?;
        if deleted > 0 {
            info!(snapshot = name, "snapshot deleted");
        }
        Ok(deleted > 0)
    }
}
