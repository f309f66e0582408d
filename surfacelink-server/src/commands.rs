//! Built-in commands
//!
//! Connectivity, catalog browsing and bridge introspection. Catalog commands
//! read through the cache from the privileged thread, so repeated browsing
//! of the same path enumerates the host only once.

use std::sync::Arc;

use serde_json::{json, Value};
use surfacelink_protocol::{name_matches, CatalogItem, CatalogNode, Params};
use surfacelink_utils::{BridgeError, Result};

use crate::catalog::CatalogPath;
use crate::dispatch::{CommandSpec, Dispatcher, ParamKind, ParamSchema};
use crate::executor::ExecutionQueue;
use crate::host::HostContext;
use crate::registry::{ConnectionRegistry, ConnectionRole};

/// How far below a category `search_browser_items` descends
pub const SEARCH_MAX_DEPTH: usize = 5;

/// Default result cap for `search_browser_items`
pub const SEARCH_DEFAULT_MAX_RESULTS: u64 = 50;

/// How deep `get_browser_item` walks the catalog looking for a URI
pub const URI_SEARCH_MAX_DEPTH: usize = 10;

/// Values accepted by the `item_type` filter of `get_browser_items`
const ITEM_TYPES: &[&str] = &["all", "folder", "device", "loadable"];

/// Register every built-in command
pub fn register_builtin(
    dispatcher: &mut Dispatcher,
    queue: &ExecutionQueue,
    registry: &Arc<ConnectionRegistry>,
) {
    dispatcher.register(CommandSpec::new("ping", ParamSchema::new(), |_, _| Ok(json!({}))));

    dispatcher.register(CommandSpec::new(
        "get_browser_tree",
        ParamSchema::new().with_default("category_type", ParamKind::String, json!("all")),
        browser_tree,
    ));

    dispatcher.register(CommandSpec::new(
        "get_browser_items_at_path",
        ParamSchema::new().required("path", ParamKind::String),
        items_at_path,
    ));

    dispatcher.register(CommandSpec::new(
        "get_browser_categories",
        ParamSchema::new().with_default("category_type", ParamKind::String, json!("all")),
        browser_categories,
    ));

    dispatcher.register(CommandSpec::new(
        "get_browser_items",
        ParamSchema::new()
            .with_default("path", ParamKind::String, json!(""))
            .with_default("item_type", ParamKind::String, json!("all")),
        browser_items,
    ));

    dispatcher.register(CommandSpec::new(
        "get_browser_item",
        ParamSchema::new()
            .optional("uri", ParamKind::String)
            .optional("path", ParamKind::String),
        browser_item,
    ));

    dispatcher.register(CommandSpec::new(
        "search_browser_items",
        ParamSchema::new()
            .required("query", ParamKind::String)
            .with_default("category_type", ParamKind::String, json!("all"))
            .with_default(
                "max_results",
                ParamKind::Integer,
                json!(SEARCH_DEFAULT_MAX_RESULTS),
            ),
        search_items,
    ));

    dispatcher.register(CommandSpec::new(
        "invalidate_catalog",
        ParamSchema::new().optional("path_prefix", ParamKind::String),
        invalidate_catalog,
    ));

    let queue = queue.clone();
    let registry = Arc::clone(registry);
    dispatcher.register(CommandSpec::new(
        "get_bridge_status",
        ParamSchema::new(),
        move |ctx, _| Ok(bridge_status(ctx, &queue, &registry)),
    ));
}

fn str_param<'a>(params: &'a Params, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::invalid_params(name, "expected string"))
}

fn item_json(item: &CatalogItem) -> Value {
    json!({
        "name": item.name,
        "uri": item.uri,
        "is_folder": item.is_folder,
        "is_device": item.is_device,
        "is_loadable": item.is_loadable,
    })
}

fn category_names(root: &CatalogNode) -> Vec<&str> {
    root.children.iter().map(|c| c.name.as_str()).collect()
}

fn selects(category_type: &str, category: &CatalogItem) -> bool {
    category_type.eq_ignore_ascii_case("all") || name_matches(&category.name, category_type)
}

fn browser_tree(ctx: &mut HostContext, params: &Params) -> Result<Value> {
    let category_type = str_param(params, "category_type")?;
    let root = ctx.catalog(&CatalogPath::root())?;

    let mut categories = Vec::new();
    for category in root.children.iter().filter(|c| selects(category_type, c)) {
        let node = ctx.catalog(&CatalogPath::root().join(&category.name))?;
        let mut entry = item_json(category);
        entry["children"] = node.children.iter().map(item_json).collect();
        categories.push(entry);
    }

    Ok(json!({
        "type": category_type,
        "categories": categories,
        "available_categories": category_names(&root),
    }))
}

fn node_json(node: &CatalogNode) -> Value {
    item_json(&node.as_item())
}

/// Walk `path` one segment at a time
///
/// Returns `Err` with a client-facing message when a segment does not name
/// a child of the node above it.
fn resolve(
    ctx: &mut HostContext,
    root: &Arc<CatalogNode>,
    path: &CatalogPath,
) -> Result<std::result::Result<Arc<CatalogNode>, String>> {
    for (depth, segment) in path.segments().iter().enumerate() {
        let parent = if depth == 0 {
            Arc::clone(root)
        } else {
            ctx.catalog(&path.prefix(depth))?
        };
        if parent.child(segment).is_none() {
            return Ok(Err(if depth == 0 {
                format!("Unknown or unavailable category: {}", segment)
            } else {
                format!("Path part '{}' not found", segment)
            }));
        }
    }
    Ok(Ok(ctx.catalog(path)?))
}

fn items_at_path(ctx: &mut HostContext, params: &Params) -> Result<Value> {
    let raw = str_param(params, "path")?;
    let path = CatalogPath::parse(raw);
    let root = ctx.catalog(&CatalogPath::root())?;

    let node = match resolve(ctx, &root, &path)? {
        Ok(node) => node,
        Err(error) => {
            return Ok(json!({
                "path": raw,
                "error": error,
                "available_categories": category_names(&root),
                "items": [],
            }))
        }
    };

    let mut result = node_json(&node);
    result["path"] = json!(raw);
    result["items"] = node.children.iter().map(item_json).collect();
    Ok(result)
}

fn browser_categories(ctx: &mut HostContext, params: &Params) -> Result<Value> {
    let category_type = str_param(params, "category_type")?;
    let root = ctx.catalog(&CatalogPath::root())?;
    let categories: Vec<_> = root
        .children
        .iter()
        .filter(|c| selects(category_type, c))
        .map(item_json)
        .collect();

    Ok(json!({
        "type": category_type,
        "categories": categories,
    }))
}

fn keeps(item_type: &str, item: &CatalogItem) -> bool {
    match item_type {
        "folder" => item.is_folder,
        "device" => item.is_device,
        "loadable" => item.is_loadable,
        _ => true,
    }
}

fn browser_items(ctx: &mut HostContext, params: &Params) -> Result<Value> {
    let raw = str_param(params, "path")?;
    let item_type = str_param(params, "item_type")?.to_ascii_lowercase();
    if !ITEM_TYPES.contains(&item_type.as_str()) {
        return Err(BridgeError::invalid_params(
            "item_type",
            format!("expected one of {}", ITEM_TYPES.join(", ")),
        ));
    }

    let path = CatalogPath::parse(raw);
    let root = ctx.catalog(&CatalogPath::root())?;
    let node = match resolve(ctx, &root, &path)? {
        Ok(node) => node,
        Err(error) => {
            return Ok(json!({
                "path": raw,
                "item_type": item_type,
                "error": error,
                "items": [],
            }))
        }
    };

    let items: Vec<_> = node
        .children
        .iter()
        .filter(|item| keeps(&item_type, item))
        .map(item_json)
        .collect();
    Ok(json!({
        "path": raw,
        "item_type": item_type,
        "items": items,
    }))
}

fn browser_item(ctx: &mut HostContext, params: &Params) -> Result<Value> {
    let uri = params.get("uri").and_then(Value::as_str);
    let raw_path = params.get("path").and_then(Value::as_str);
    if uri.is_none() && raw_path.is_none() {
        return Err(BridgeError::invalid_params("uri", "either uri or path is required"));
    }

    let mut result = json!({
        "uri": uri,
        "path": raw_path,
        "found": false,
    });

    // A URI match wins; the path is the fallback
    if let Some(uri) = uri {
        if let Some((path, item)) = find_by_uri(ctx, &CatalogPath::root(), uri, 0)? {
            let mut entry = item_json(&item);
            entry["path"] = json!(path.to_string());
            result["found"] = json!(true);
            result["item"] = entry;
            return Ok(result);
        }
    }

    match raw_path {
        Some(raw) => {
            let path = CatalogPath::parse(raw);
            let root = ctx.catalog(&CatalogPath::root())?;
            match resolve(ctx, &root, &path)? {
                Ok(node) => {
                    let mut entry = node_json(&node);
                    entry["path"] = json!(path.to_string());
                    result["found"] = json!(true);
                    result["item"] = entry;
                }
                Err(error) => result["error"] = json!(error),
            }
        }
        None => {
            result["error"] = json!(format!("No item with URI '{}'", uri.unwrap_or_default()));
        }
    }
    Ok(result)
}

fn find_by_uri(
    ctx: &mut HostContext,
    path: &CatalogPath,
    uri: &str,
    depth: usize,
) -> Result<Option<(CatalogPath, CatalogItem)>> {
    if depth >= URI_SEARCH_MAX_DEPTH {
        return Ok(None);
    }

    let node = ctx.catalog(path)?;
    for child in &node.children {
        let child_path = path.join(&child.name);
        if child.uri.as_deref() == Some(uri) {
            return Ok(Some((child_path, child.clone())));
        }
        if child.is_folder {
            if let Some(found) = find_by_uri(ctx, &child_path, uri, depth + 1)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

fn search_items(ctx: &mut HostContext, params: &Params) -> Result<Value> {
    let query = str_param(params, "query")?;
    if query.trim().is_empty() {
        return Err(BridgeError::invalid_params("query", "must not be empty"));
    }
    let category_type = str_param(params, "category_type")?;
    let max_results = params
        .get("max_results")
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .ok_or_else(|| BridgeError::invalid_params("max_results", "expected a positive integer"))?
        as usize;

    let needle = query.to_lowercase();
    let root = ctx.catalog(&CatalogPath::root())?;
    let mut results = Vec::new();

    for category in root.children.iter().filter(|c| selects(category_type, c)) {
        if results.len() >= max_results {
            break;
        }
        let path = CatalogPath::root().join(&category.name);
        collect_matches(ctx, &path, &needle, 0, max_results, &mut results)?;
    }

    Ok(json!({
        "query": query,
        "total_results": results.len(),
        "results": results,
    }))
}

fn collect_matches(
    ctx: &mut HostContext,
    path: &CatalogPath,
    needle: &str,
    depth: usize,
    max_results: usize,
    results: &mut Vec<Value>,
) -> Result<()> {
    if depth >= SEARCH_MAX_DEPTH {
        return Ok(());
    }

    let node = ctx.catalog(path)?;
    for child in &node.children {
        if results.len() >= max_results {
            break;
        }
        let child_path = path.join(&child.name);
        if child.name.to_lowercase().contains(needle) {
            let mut entry = item_json(child);
            entry["path"] = json!(child_path.to_string());
            results.push(entry);
        }
        if child.is_folder {
            collect_matches(ctx, &child_path, needle, depth + 1, max_results, results)?;
        }
    }
    Ok(())
}

fn invalidate_catalog(ctx: &mut HostContext, params: &Params) -> Result<Value> {
    let prefix = match params.get("path_prefix").and_then(Value::as_str) {
        Some(prefix) => CatalogPath::parse(prefix),
        None => CatalogPath::root(),
    };
    let invalidated = ctx.catalog_cache().invalidate(&prefix);
    Ok(json!({
        "path_prefix": prefix.to_string(),
        "invalidated": invalidated,
    }))
}

fn bridge_status(ctx: &HostContext, queue: &ExecutionQueue, registry: &ConnectionRegistry) -> Value {
    let stats = queue.stats();
    let cache = ctx.catalog_cache().stats();
    let executing = stats.executing.map(|c| {
        json!({
            "id": c.id.value(),
            "command_type": c.command_type,
            "running_ms": c.started_at.elapsed().as_millis() as u64,
        })
    });

    json!({
        "host": ctx.host().name(),
        "queue": {
            "depth": stats.depth,
            "executed": stats.executed,
            "shutting_down": stats.shutting_down,
            "executing": executing,
        },
        "cache": {
            "entries": cache.entries,
            "populations": cache.populations,
            "invalidations": cache.invalidations,
        },
        "connections": {
            "inbound": registry.count_by_role(ConnectionRole::Inbound),
            "outbound": registry.count_by_role(ConnectionRole::Outbound),
        },
    })
}
