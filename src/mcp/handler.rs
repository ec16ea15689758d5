//! # MCP Handler Module
//!
//! This module implements the Model Context Protocol (MCP) for the 3xpl
//! explorer server. It handles incoming MCP requests and dispatches them to
//! the explorer tools.
//!
//! ## Supported Tools
//!
//! ### Aggregation (read-only SQL over a `data` table)
//! - `aggregate_block_transfers` - Transfers within a block
//! - `aggregate_transaction_transfers` - Transfers within a transaction
//! - `aggregate_address_mempool` - Pending transfers of an address
//! - `aggregate_address_balances` - Balances of an address
//! - `aggregate_address_transfers` - Confirmed transfers of an address
//!
//! ### Overviews
//! - `get_address_overview`, `get_block_overview`, `get_transaction_overview`
//! - `get_latest_block`, `get_transactions_count_24h`,
//!   `get_mempool_transactions_count`, `get_transaction_fee_24h_usd`
//!
//! ### Lookup
//! - `detect_blockchains`, `resolve_ens_domain`, `list_blockchains_and_modules`
//!
//! ## Prompts
//! - `get_blockchain_info`

use crate::{
    aggregate::QueryFamily,
    explorer::services::{
        address, aggregate,
        aggregate::AggregateRequest,
        block, modules, search, transaction,
    },
    mcp::protocol::{error_codes, Request, Response},
    utils, AppState,
};
use serde_json::{json, Value};
use tracing::{error, info};
use validator::Validate;

pub const SERVER_NAME: &str = "3xpl_API";

const TOOL_NAMES: [&str; 15] = [
    "get_address_overview",
    "get_block_overview",
    "get_latest_block",
    "detect_blockchains",
    "resolve_ens_domain",
    "get_transaction_overview",
    "get_transactions_count_24h",
    "get_mempool_transactions_count",
    "get_transaction_fee_24h_usd",
    "aggregate_block_transfers",
    "aggregate_transaction_transfers",
    "aggregate_address_balances",
    "aggregate_address_mempool",
    "aggregate_address_transfers",
    "list_blockchains_and_modules",
];

// Helper: produce a result Value that always contains a text content array
// and preserves structured data for JSON-friendly clients.
fn make_texty_result(text: String, payload: Value) -> Value {
    let content = json!([{ "type": "text", "text": text }]);
    match payload {
        Value::Object(mut map) => {
            // Do not overwrite if caller already set content
            if !map.contains_key("content") {
                map.insert("content".into(), content);
            }
            Value::Object(map)
        }
        other => json!({
            "data": other,
            "content": content
        }),
    }
}

fn internal_error(req_id: &Value, err: anyhow::Error) -> Response {
    error!("Tool call failed: {:#}", err);
    Response::error(req_id.clone(), error_codes::INTERNAL_ERROR, format!("{:#}", err))
}

/// This is the main dispatcher for all incoming MCP requests.
pub async fn handle_mcp_request(req: Request, state: AppState) -> Option<Response> {
    info!("Handling MCP request for method: {}", req.method);

    if req.is_notification() {
        return None;
    }

    let response = match req.method.as_str() {
        "initialize" => handle_initialize(&req),
        "tools/list" => handle_tools_list(&req),
        "tools/call" => handle_tool_call(req, state).await,
        "prompts/list" => handle_prompts_list(&req),
        "prompts/get" => handle_prompts_get(&req),
        // Direct method calls from CLI clients reuse the tools/call path
        name if TOOL_NAMES.contains(&name) => handle_tool_call(req.into_tool_call(), state).await,
        _ => Response::error(
            req.id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", req.method),
        ),
    };

    Some(response)
}

/// Argument naming the aggregation target of each family.
fn target_arg(family: QueryFamily) -> &'static str {
    match family {
        QueryFamily::BlockTransfers => "height",
        QueryFamily::TransactionTransfers => "transaction_hash",
        QueryFamily::AddressMempool
        | QueryFamily::AddressBalances
        | QueryFamily::AddressTransfers => "address",
    }
}

async fn call_aggregate_tool(
    family: QueryFamily,
    args: &Value,
    req_id: &Value,
    state: &AppState,
) -> Result<Response, Response> {
    let target = match family {
        QueryFamily::BlockTransfers => utils::get_height_arg(args, "height", req_id)?.to_string(),
        other => utils::get_required_arg::<String>(args, target_arg(other), req_id)?,
    };
    let request = AggregateRequest {
        blockchain: utils::get_required_arg(args, "blockchain", req_id)?,
        module: utils::get_required_arg(args, "module", req_id)?,
        target,
        sql_query: utils::get_required_arg(args, "sql_query", req_id)?,
    };
    request.validate().map_err(|e| {
        Response::error(req_id.clone(), error_codes::INVALID_PARAMS, e.to_string())
    })?;

    let limits = state.config.aggregation_limits();
    let result = aggregate::aggregate(&state.explorer, &limits, family, &request)
        .await
        .map_err(|e| {
            error!("{} failed ({}): {}", family, e.kind(), e);
            Response::aggregate_error(req_id.clone(), &e)
        })?;

    let text = serde_json::to_string(&result).map_err(|e| internal_error(req_id, e.into()))?;
    Ok(Response::success(
        req_id.clone(),
        make_texty_result(text, json!(result)),
    ))
}

/// Handles a 'tools/call' request by dispatching it to the correct tool logic.
async fn handle_tool_call(req: Request, state: AppState) -> Response {
    let params = match req.params.as_ref() {
        Some(p) => p,
        None => {
            return Response::error(
                req.id,
                error_codes::INVALID_PARAMS,
                "Missing 'params' object".into(),
            )
        }
    };

    let tool_name = match params.get("name").and_then(|n| n.as_str()) {
        Some(name) => name,
        None => {
            return Response::error(
                req.id,
                error_codes::INVALID_PARAMS,
                "Missing 'name' field in params".into(),
            )
        }
    };

    let empty_args = json!({});
    let args = params.get("arguments").unwrap_or(&empty_args);
    let req_id = &req.id;
    let client = &state.explorer;

    if let Some(family) = tool_name
        .strip_prefix("aggregate_")
        .and_then(|f| f.parse::<QueryFamily>().ok())
    {
        return call_aggregate_tool(family, args, req_id, &state)
            .await
            .unwrap_or_else(|e| e);
    }

    let res: Result<Response, Response> = (async {
        let (text, payload) = match tool_name {
            "get_address_overview" => {
                let blockchain: String = utils::get_required_arg(args, "blockchain", req_id)?;
                let address: String = utils::get_required_arg(args, "address", req_id)?;
                let text = address::get_address_overview(client, &blockchain, &address)
                    .await
                    .map_err(|e| internal_error(req_id, e))?;
                (text, Value::Null)
            }
            "get_block_overview" => {
                let blockchain: String = utils::get_required_arg(args, "blockchain", req_id)?;
                let height = utils::get_height_arg(args, "height", req_id)?;
                let text = block::get_block_overview(client, &blockchain, height)
                    .await
                    .map_err(|e| internal_error(req_id, e))?;
                (text, Value::Null)
            }
            "get_latest_block" => {
                let blockchain: String = utils::get_required_arg(args, "blockchain", req_id)?;
                let height = block::get_latest_block(client, &blockchain)
                    .await
                    .map_err(|e| internal_error(req_id, e))?;
                (height.to_string(), json!(height))
            }
            "get_transaction_overview" => {
                let blockchain: String = utils::get_required_arg(args, "blockchain", req_id)?;
                let hash: String = utils::get_required_arg(args, "transaction_hash", req_id)?;
                let text = transaction::get_transaction_overview(client, &blockchain, &hash)
                    .await
                    .map_err(|e| internal_error(req_id, e))?;
                (text, Value::Null)
            }
            "get_transactions_count_24h"
            | "get_mempool_transactions_count"
            | "get_transaction_fee_24h_usd" => {
                let blockchain: String = utils::get_required_arg(args, "blockchain", req_id)?;
                let value = match tool_name {
                    "get_transactions_count_24h" => {
                        transaction::get_transactions_count_24h(client, &blockchain).await
                    }
                    "get_mempool_transactions_count" => {
                        transaction::get_mempool_transactions_count(client, &blockchain).await
                    }
                    _ => transaction::get_transaction_fee_24h_usd(client, &blockchain).await,
                }
                .map_err(|e| internal_error(req_id, e))?;
                (value.to_string(), value)
            }
            "detect_blockchains" => {
                let data: String = utils::get_required_arg(args, "data", req_id)?;
                let found = search::detect_blockchains(client, &data)
                    .await
                    .map_err(|e| internal_error(req_id, e))?;
                let text = if found.is_empty() {
                    "No blockchains found for this data.".to_string()
                } else {
                    found.join(", ")
                };
                (text, json!(found))
            }
            "resolve_ens_domain" => {
                let domain: String = utils::get_required_arg(args, "domain", req_id)?;
                let resolved = search::resolve_ens_domain(client, &domain)
                    .await
                    .map_err(|e| internal_error(req_id, e))?;
                (resolved.clone(), json!(resolved))
            }
            "list_blockchains_and_modules" => {
                let catalog = modules::list_blockchains_and_modules(client)
                    .await
                    .map_err(|e| internal_error(req_id, e))?;
                (catalog.to_string(), catalog)
            }
            _ => {
                return Err(Response::error(
                    req_id.clone(),
                    error_codes::METHOD_NOT_FOUND,
                    format!("Tool not found: {}", tool_name),
                ))
            }
        };
        Ok(Response::success(req_id.clone(), make_texty_result(text, payload)))
    })
    .await;
    res.unwrap_or_else(|err_resp| err_resp)
}

/// Handles the 'initialize' request.
fn handle_initialize(req: &Request) -> Response {
    let server_info = json!({
        "name": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION")
    });
    let capabilities = json!({
        "tools": { "listChanged": false },
        "prompts": { "listChanged": false }
    });
    let instructions = "3xpl blockchain explorer server: overviews of addresses, blocks and \
        transactions, plus read-only SQL aggregation over transfers and balances.";

    Response::success(
        req.id.clone(),
        json!({
            "serverInfo": server_info,
            "protocolVersion": "2025-06-18",
            "capabilities": capabilities,
            "instructions": instructions
        }),
    )
}

fn column_listing(family: QueryFamily) -> String {
    family
        .schema()
        .columns()
        .iter()
        .map(|c| format!("{} {}", c.name, c.ty))
        .collect::<Vec<_>>()
        .join(", ")
}

fn aggregate_tool(family: QueryFamily, summary: &str, target_description: &str) -> Value {
    let target = target_arg(family);
    let target_type = if family == QueryFamily::BlockTransfers {
        "integer"
    } else {
        "string"
    };
    json!({
        "name": format!("aggregate_{}", family),
        "description": format!(
            "{} The rows are loaded into a SQLite table called `data` with columns: {}. \
             `effect` and `balance` are in the smallest currency units; divide by \
             10^decimals for human amounts. `exchange_rate` is in USD and null for \
             unlisted currencies. Only a single read-only SELECT is allowed.",
            summary,
            column_listing(family)
        ),
        "inputSchema": {
            "type": "object",
            "properties": {
                "blockchain": {"type": "string", "description": "Lowercase blockchain name with dashes instead of spaces."},
                "module": {"type": "string", "description": "Module to read from (e.g. 'ethereum-main', 'ethereum-erc-20')."},
                target: {"type": target_type, "description": target_description},
                "sql_query": {"type": "string", "description": "SQLite SELECT statement over the `data` table."}
            },
            "required": ["blockchain", "module", target, "sql_query"],
            "additionalProperties": false
        }
    })
}

fn blockchain_only_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {
                "blockchain": {"type": "string", "description": "Lowercase blockchain name with dashes instead of spaces."}
            },
            "required": ["blockchain"],
            "additionalProperties": false
        }
    })
}

/// Handles the 'tools/list' request by returning a JSON definition of all available tools.
fn handle_tools_list(req: &Request) -> Response {
    let tools = json!([
        {
            "name": "get_address_overview",
            "description": "Get main information about an address: verified balances, pending transactions and the last transaction.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "blockchain": {"type": "string", "description": "Lowercase blockchain name with dashes instead of spaces."},
                    "address": {"type": "string", "description": "A plain address. Must not be an ENS domain."}
                },
                "required": ["blockchain", "address"],
                "additionalProperties": false
            }
        },
        {
            "name": "get_block_overview",
            "description": "Get main information about a block: confirmations, hash, timestamp and transfer counts per module.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "blockchain": {"type": "string", "description": "Lowercase blockchain name with dashes instead of spaces."},
                    "height": {"type": "integer", "description": "Height of the requested block."}
                },
                "required": ["blockchain", "height"],
                "additionalProperties": false
            }
        },
        blockchain_only_tool("get_latest_block", "Fetch the height of the latest (best) block in the requested blockchain."),
        {
            "name": "detect_blockchains",
            "description": "Detect the blockchains in which an address, a transaction hash or an ENS domain was found.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "data": {"type": "string", "description": "Address, transaction hash or ENS domain."}
                },
                "required": ["data"],
                "additionalProperties": false
            }
        },
        {
            "name": "resolve_ens_domain",
            "description": "Resolve an ENS domain to the EVM address linked to it.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "domain": {"type": "string", "description": "The ENS domain to resolve (e.g. 'vitalik.eth')."}
                },
                "required": ["domain"],
                "additionalProperties": false
            }
        },
        {
            "name": "get_transaction_overview",
            "description": "Get main information about a transaction: including block, confirmations and transfer counts per module.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "blockchain": {"type": "string", "description": "Lowercase blockchain name with dashes instead of spaces."},
                    "transaction_hash": {"type": "string", "description": "Hash of the transaction."}
                },
                "required": ["blockchain", "transaction_hash"],
                "additionalProperties": false
            }
        },
        blockchain_only_tool("get_transactions_count_24h", "Count of individual transfers (not transactions) per module over the last 24 hours."),
        blockchain_only_tool("get_mempool_transactions_count", "Current count of individual transfers per module waiting in the mempool."),
        blockchain_only_tool("get_transaction_fee_24h_usd", "Average recommended transaction fee over the last 24 hours, in USD."),
        aggregate_tool(
            QueryFamily::BlockTransfers,
            "Aggregate individual transfers within a block of one module.",
            "Height of the block."
        ),
        aggregate_tool(
            QueryFamily::TransactionTransfers,
            "Aggregate individual transfers within a transaction of one module.",
            "Hash of the transaction."
        ),
        aggregate_tool(
            QueryFamily::AddressBalances,
            "Aggregate balance info for an address within one module. A `-main` module has a single row.",
            "The address whose balances are read."
        ),
        aggregate_tool(
            QueryFamily::AddressMempool,
            "Aggregate pending mempool transfers for an address within one module.",
            "The address whose pending transfers are read."
        ),
        aggregate_tool(
            QueryFamily::AddressTransfers,
            "Aggregate confirmed individual transfers for an address within one module.",
            "The address whose transfers are read."
        ),
        {
            "name": "list_blockchains_and_modules",
            "description": "List all available blockchains with their modules and module descriptions.",
            "inputSchema": { "type": "object", "properties": {}, "additionalProperties": false }
        },
    ]);
    Response::success(req.id.clone(), json!({ "tools": tools }))
}

fn handle_prompts_list(req: &Request) -> Response {
    Response::success(
        req.id.clone(),
        json!({
            "prompts": [{
                "name": "get_blockchain_info",
                "description": "Instructions on how to answer a query about blockchain data.",
                "arguments": [{
                    "name": "query",
                    "description": "Concise query of the user with full context.",
                    "required": true
                }]
            }]
        }),
    )
}

fn blockchain_info_prompt(query: &str) -> String {
    format!(
        "For this query about getting blockchain information: \"{}\" make sure to do the following:\n\
         - Call the right tools in sequence, using each tool's output as input to the next when it adds value to the context.\n\
         - Provide only information that answers the query.",
        query
    )
}

fn handle_prompts_get(req: &Request) -> Response {
    let empty = json!({});
    let params = req.params.as_ref().unwrap_or(&empty);
    match params.get("name").and_then(Value::as_str) {
        Some("get_blockchain_info") => {
            let args = params.get("arguments").unwrap_or(&empty);
            let query: String = match utils::get_required_arg(args, "query", &req.id) {
                Ok(q) => q,
                Err(resp) => return resp,
            };
            Response::success(
                req.id.clone(),
                json!({
                    "description": "Instructions on how to answer a query about blockchain data.",
                    "messages": [{
                        "role": "user",
                        "content": { "type": "text", "text": blockchain_info_prompt(&query) }
                    }]
                }),
            )
        }
        Some(other) => Response::error(
            req.id.clone(),
            error_codes::INVALID_PARAMS,
            format!("Prompt not found: {}", other),
        ),
        None => Response::error(
            req.id.clone(),
            error_codes::INVALID_PARAMS,
            "Missing 'name' field in params".into(),
        ),
    }
}
