//! Datastore commands.

use std::io::Write;

use anyhow::{Context, Result};
use radoskv::{
    CompareOp, Datastore, FilterKeyCompare, FilterValueCompare, Key, OrderByKey,
    OrderByKeyDescending, OrderByValue, OrderByValueDescending, PoolDatastore, Query,
};

pub fn put(ds: &PoolDatastore, key: &str, value: &[u8]) -> Result<()> {
    let key = Key::new(key);
    ds.put(&key, value)
        .with_context(|| format!("put {}", key))?;
    eprintln!("stored {} ({} bytes)", key, value.len());
    Ok(())
}

pub fn get(ds: &PoolDatastore, key: &str) -> Result<()> {
    let key = Key::new(key);
    let value = ds.get(&key).with_context(|| format!("get {}", key))?;
    let mut out = std::io::stdout().lock();
    out.write_all(&value)?;
    out.flush()?;
    Ok(())
}

pub fn rm(ds: &PoolDatastore, key: &str) -> Result<()> {
    let key = Key::new(key);
    ds.delete(&key).with_context(|| format!("delete {}", key))?;
    eprintln!("deleted {}", key);
    Ok(())
}

pub fn has(ds: &PoolDatastore, key: &str) -> Result<bool> {
    let key = Key::new(key);
    let found = ds.has(&key).with_context(|| format!("has {}", key))?;
    println!("{}", found);
    Ok(found)
}

pub fn size(ds: &PoolDatastore, key: &str) -> Result<()> {
    let key = Key::new(key);
    let size = ds.get_size(&key).with_context(|| format!("size {}", key))?;
    println!("{}", size);
    Ok(())
}

#[derive(Debug)]
pub struct ListArgs {
    pub prefix: String,
    pub keys_only: bool,
    pub offset: usize,
    pub limit: usize,
    pub sorted: bool,
    pub by_value: bool,
    pub reverse: bool,
    pub after: Option<String>,
    pub value_eq: Option<String>,
}

/// Print one entry per line: the key, then either the size (keys only) or the
/// value when it is valid UTF-8.
pub fn ls(ds: &PoolDatastore, args: ListArgs) -> Result<()> {
    let mut query = Query::new()
        .with_prefix(args.prefix)
        .with_keys_only(args.keys_only)
        .with_returns_sizes(args.keys_only)
        .with_offset(args.offset)
        .with_limit(args.limit);
    if let Some(after) = args.after {
        query = query.with_filter(FilterKeyCompare {
            op: CompareOp::GreaterThan,
            key: Key::new(after).to_string(),
        });
    }
    if let Some(value) = args.value_eq {
        query = query.with_filter(FilterValueCompare {
            op: CompareOp::Equal,
            value: value.into_bytes(),
        });
    }
    match (args.by_value, args.reverse) {
        (true, false) => query = query.with_order(OrderByValue).with_order(OrderByKey),
        (true, true) => {
            query = query
                .with_order(OrderByValueDescending)
                .with_order(OrderByKeyDescending)
        }
        (false, true) => query = query.with_order(OrderByKeyDescending),
        (false, false) if args.sorted => query = query.with_order(OrderByKey),
        (false, false) => {}
    }

    let mut out = std::io::stdout().lock();
    let mut count = 0usize;
    for entry in ds.query(query).context("query")? {
        let entry = entry.context("query")?;
        match (&entry.value, entry.size) {
            (Some(value), _) => match std::str::from_utf8(value) {
                Ok(s) => writeln!(out, "{}\t{}", entry.key, s)?,
                Err(_) => writeln!(out, "{}\t<{} bytes>", entry.key, value.len())?,
            },
            (None, Some(size)) => writeln!(out, "{}\t{}", entry.key, size)?,
            (None, None) => writeln!(out, "{}", entry.key)?,
        }
        count += 1;
    }
    out.flush()?;
    eprintln!("{} entries", count);
    Ok(())
}
