use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::{
        stdio,
        streamable_http_server::{
            StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
        },
    },
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use character_tree_mcp_rs::config::StoreConfig;
use character_tree_mcp_rs::error::TreeError;
use character_tree_mcp_rs::logging::{init_logging, TransportMode};
use character_tree_mcp_rs::manager::TreeManager;
use character_tree_mcp_rs::session::Session;
use character_tree_mcp_rs::storage::open_store;
use character_tree_mcp_rs::grouping::GroupPatch;
use character_tree_mcp_rs::tree::{CharacterDraft, CharacterPatch, Position, RelationshipType};

#[derive(Debug, Parser)]
#[command(name = "character-tree-mcp-rs", version, about = "Character tree editor served over MCP")]
struct Cli {
    /// Serve streamable HTTP instead of stdio
    #[arg(short = 's', long)]
    stream: bool,

    /// HTTP port (stream mode)
    #[arg(short = 'p', long, default_value_t = 8000)]
    port: u16,

    /// HTTP bind address (stream mode)
    #[arg(short = 'b', long, default_value = "127.0.0.1")]
    bind: String,

    /// SQLite database for signed-in users
    #[arg(long, env = "CHARACTER_TREE_DB")]
    db_path: Option<PathBuf>,

    /// JSON document for guests
    #[arg(long, env = "CHARACTER_TREE_LOCAL")]
    local_path: Option<PathBuf>,

    /// Signed-in user; omit to run as guest
    #[arg(short = 'u', long, env = "CHARACTER_TREE_USER")]
    user: Option<String>,

    /// Also write logs to this file
    #[arg(short = 'l', long)]
    log: Option<PathBuf>,
}

#[derive(Clone)]
struct CharacterTreeServer {
    manager: Arc<TreeManager>,
    tool_router: ToolRouter<Self>,
}

impl CharacterTreeServer {
    fn new(manager: Arc<TreeManager>) -> Self {
        Self {
            manager,
            tool_router: Self::tool_router(),
        }
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "character-tree-mcp-rs".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: Some(
                "Open or create a tree first; character, relationship and grouping tools act on the open tree."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl CharacterTreeServer {
    #[tool(name = "list_trees", description = "List every character tree visible to this session")]
    async fn list_trees(&self) -> Result<CallToolResult, McpError> {
        let trees = self
            .manager
            .list_trees()
            .await
            .map_err(tool_err("Failed to list trees"))?;
        Ok(structured(format!("{} trees", trees.len()), &trees))
    }

    #[tool(name = "open_tree", description = "Open a tree by id and make it the current tree")]
    async fn open_tree(&self, Parameters(args): Parameters<TreeIdArgs>) -> Result<CallToolResult, McpError> {
        let tree = self
            .manager
            .open_tree(&args.tree_id)
            .await
            .map_err(tool_err("Failed to open tree"))?;
        Ok(structured(
            format!("Opened '{}' with {} characters", tree.name, tree.characters.len()),
            &tree,
        ))
    }

    #[tool(name = "current_tree", description = "Return the currently open tree")]
    async fn current_tree(&self) -> Result<CallToolResult, McpError> {
        let tree = self.manager.current_tree().await.ok_or_else(|| {
            McpError::invalid_params("No tree is open", Some(json!({ "error": TreeError::NoCurrentTree.to_string() })))
        })?;
        Ok(structured(format!("Current tree is '{}'", tree.name), &tree))
    }

    #[tool(name = "create_tree", description = "Create a new, empty character tree and open it")]
    async fn create_tree(&self, Parameters(args): Parameters<CreateTreeArgs>) -> Result<CallToolResult, McpError> {
        let tree = self
            .manager
            .create_tree(&args.name, args.description.as_deref())
            .await
            .map_err(tool_err("Failed to create tree"))?;
        Ok(structured(format!("Created tree '{}'", tree.name), &tree))
    }

    #[tool(name = "update_tree_details", description = "Rename or re-describe the open tree")]
    async fn update_tree_details(
        &self,
        Parameters(args): Parameters<UpdateTreeDetailsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let tree = self
            .manager
            .update_tree_details(args.name.as_deref(), args.description.as_deref())
            .await
            .map_err(tool_err("Failed to update tree"))?;
        Ok(structured(format!("Updated tree '{}'", tree.name), &tree))
    }

    #[tool(name = "delete_tree", description = "Delete a character tree with all its characters")]
    async fn delete_tree(&self, Parameters(args): Parameters<TreeIdArgs>) -> Result<CallToolResult, McpError> {
        self.manager
            .delete_tree(&args.tree_id)
            .await
            .map_err(tool_err("Failed to delete tree"))?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Tree '{}' deleted",
            args.tree_id
        ))]))
    }

    #[tool(name = "get_character", description = "Fetch one character of the open tree")]
    async fn get_character(&self, Parameters(args): Parameters<CharacterIdArgs>) -> Result<CallToolResult, McpError> {
        let character = self
            .manager
            .get_character(&args.character_id)
            .await
            .map_err(tool_err("Failed to get character"))?;
        Ok(structured(format!("Character '{}'", character.name), &character))
    }

    #[tool(name = "add_character", description = "Add a character to the open tree")]
    async fn add_character(&self, Parameters(args): Parameters<CharacterDraft>) -> Result<CallToolResult, McpError> {
        let character = self
            .manager
            .add_character(args)
            .await
            .map_err(tool_err("Failed to add character"))?;
        Ok(structured(format!("Added character '{}'", character.name), &character))
    }

    #[tool(name = "update_character", description = "Update fields of a character in the open tree")]
    async fn update_character(
        &self,
        Parameters(args): Parameters<UpdateCharacterArgs>,
    ) -> Result<CallToolResult, McpError> {
        let character = self
            .manager
            .update_character(&args.character_id, args.changes)
            .await
            .map_err(tool_err("Failed to update character"))?;
        Ok(structured(format!("Updated character '{}'", character.name), &character))
    }

    #[tool(
        name = "delete_character",
        description = "Delete a character and every relationship pointing at it"
    )]
    async fn delete_character(
        &self,
        Parameters(args): Parameters<CharacterIdArgs>,
    ) -> Result<CallToolResult, McpError> {
        let character = self
            .manager
            .delete_character(&args.character_id)
            .await
            .map_err(tool_err("Failed to delete character"))?;
        Ok(structured(format!("Deleted character '{}'", character.name), &character))
    }

    #[tool(name = "add_relationship", description = "Add a directed, typed relationship between two characters")]
    async fn add_relationship(
        &self,
        Parameters(args): Parameters<AddRelationshipArgs>,
    ) -> Result<CallToolResult, McpError> {
        let relationship = self
            .manager
            .add_relationship(
                &args.source_character_id,
                &args.target_character_id,
                args.relationship_type,
                args.description,
            )
            .await
            .map_err(tool_err("Failed to add relationship"))?;
        Ok(structured(
            format!(
                "{} -> {} ({})",
                args.source_character_id, args.target_character_id, relationship.relationship_type
            ),
            &relationship,
        ))
    }

    #[tool(name = "update_relationship", description = "Change the type or description of a relationship")]
    async fn update_relationship(
        &self,
        Parameters(args): Parameters<UpdateRelationshipArgs>,
    ) -> Result<CallToolResult, McpError> {
        let relationship = self
            .manager
            .update_relationship(
                &args.source_character_id,
                &args.relationship_id,
                args.relationship_type,
                args.description,
            )
            .await
            .map_err(tool_err("Failed to update relationship"))?;
        Ok(structured(format!("Relationship '{}' updated", relationship.id), &relationship))
    }

    #[tool(name = "delete_relationship", description = "Delete one relationship from its source character")]
    async fn delete_relationship(
        &self,
        Parameters(args): Parameters<RelationshipIdArgs>,
    ) -> Result<CallToolResult, McpError> {
        let relationship = self
            .manager
            .delete_relationship(&args.source_character_id, &args.relationship_id)
            .await
            .map_err(tool_err("Failed to delete relationship"))?;
        Ok(structured(format!("Relationship '{}' deleted", relationship.id), &relationship))
    }

    #[tool(
        name = "enable_grouping",
        description = "Group characters by relationship type and lay the open tree out on a grid"
    )]
    async fn enable_grouping(&self) -> Result<CallToolResult, McpError> {
        let groups = self
            .manager
            .enable_grouping()
            .await
            .map_err(tool_err("Failed to group characters"))?;
        Ok(structured(format!("{} groups", groups.len()), &groups))
    }

    #[tool(name = "disable_grouping", description = "Discard the current groups")]
    async fn disable_grouping(&self) -> Result<CallToolResult, McpError> {
        self.manager.disable_grouping().await;
        Ok(CallToolResult::success(vec![Content::text("Grouping disabled")]))
    }

    #[tool(name = "list_groups", description = "List the groups of the current grouping pass")]
    async fn list_groups(&self) -> Result<CallToolResult, McpError> {
        let groups = self.manager.groups().await;
        Ok(structured(format!("{} groups", groups.len()), &groups))
    }

    #[tool(name = "add_group", description = "Create a group by hand from characters of the open tree")]
    async fn add_group(&self, Parameters(args): Parameters<AddGroupArgs>) -> Result<CallToolResult, McpError> {
        let group = self
            .manager
            .add_group(
                args.relationship_type,
                args.character_ids,
                args.position.unwrap_or_default(),
                args.label,
            )
            .await
            .map_err(tool_err("Failed to add group"))?;
        Ok(structured(format!("Added group '{}'", group.label), &group))
    }

    #[tool(name = "update_group", description = "Change the label, position or relationship type of a group")]
    async fn update_group(&self, Parameters(args): Parameters<UpdateGroupArgs>) -> Result<CallToolResult, McpError> {
        let group = self
            .manager
            .update_group(&args.group_id, args.changes)
            .await
            .map_err(tool_err("Failed to update group"))?;
        Ok(structured(format!("Updated group '{}'", group.label), &group))
    }

    #[tool(name = "remove_group", description = "Remove one group from the current grouping pass")]
    async fn remove_group(&self, Parameters(args): Parameters<GroupIdArgs>) -> Result<CallToolResult, McpError> {
        let group = self
            .manager
            .remove_group(&args.group_id)
            .await
            .map_err(tool_err("Failed to remove group"))?;
        Ok(structured(format!("Removed group '{}'", group.label), &group))
    }

    #[tool(name = "add_character_to_group", description = "Add a character to a group")]
    async fn add_character_to_group(
        &self,
        Parameters(args): Parameters<GroupMemberArgs>,
    ) -> Result<CallToolResult, McpError> {
        let group = self
            .manager
            .add_character_to_group(&args.group_id, &args.character_id)
            .await
            .map_err(tool_err("Failed to add character to group"))?;
        Ok(structured(group.label.clone(), &group))
    }

    #[tool(name = "remove_character_from_group", description = "Remove a character from a group")]
    async fn remove_character_from_group(
        &self,
        Parameters(args): Parameters<GroupMemberArgs>,
    ) -> Result<CallToolResult, McpError> {
        let group = self
            .manager
            .remove_character_from_group(&args.group_id, &args.character_id)
            .await
            .map_err(tool_err("Failed to remove character from group"))?;
        Ok(structured(group.label.clone(), &group))
    }

    #[tool(name = "move_character_to_group", description = "Move a character from one group to another")]
    async fn move_character_to_group(
        &self,
        Parameters(args): Parameters<MoveCharacterArgs>,
    ) -> Result<CallToolResult, McpError> {
        let groups = self
            .manager
            .move_character_to_group(&args.character_id, &args.from_group_id, &args.to_group_id)
            .await
            .map_err(tool_err("Failed to move character"))?;
        Ok(structured(format!("Moved character '{}'", args.character_id), &groups))
    }

    #[tool(name = "export_trees", description = "Export every tree as a JSON document")]
    async fn export_trees(&self) -> Result<CallToolResult, McpError> {
        let document = self
            .manager
            .export_trees()
            .await
            .map_err(tool_err("Failed to export trees"))?;
        Ok(CallToolResult::success(vec![Content::text(document)]))
    }

    #[tool(name = "import_trees", description = "Import trees from a JSON document produced by export_trees")]
    async fn import_trees(&self, Parameters(args): Parameters<ImportTreesArgs>) -> Result<CallToolResult, McpError> {
        let count = self
            .manager
            .import_trees(&args.document)
            .await
            .map_err(tool_err("Failed to import trees"))?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{} trees imported",
            count
        ))]))
    }
}

#[tool_handler]
impl ServerHandler for CharacterTreeServer {
    fn get_info(&self) -> ServerInfo {
        self.server_info()
    }
}

// Tool argument schemas

#[derive(Debug, Deserialize, JsonSchema)]
struct TreeIdArgs {
    tree_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateTreeArgs {
    name: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateTreeDetailsArgs {
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CharacterIdArgs {
    character_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateCharacterArgs {
    character_id: String,
    changes: CharacterPatch,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddRelationshipArgs {
    source_character_id: String,
    target_character_id: String,
    relationship_type: RelationshipType,
    description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateRelationshipArgs {
    source_character_id: String,
    relationship_id: String,
    relationship_type: RelationshipType,
    description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RelationshipIdArgs {
    source_character_id: String,
    relationship_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GroupIdArgs {
    group_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddGroupArgs {
    relationship_type: RelationshipType,
    character_ids: Vec<String>,
    position: Option<Position>,
    label: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateGroupArgs {
    group_id: String,
    changes: GroupPatch,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GroupMemberArgs {
    group_id: String,
    character_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MoveCharacterArgs {
    character_id: String,
    from_group_id: String,
    to_group_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ImportTreesArgs {
    document: String,
}

fn structured<T: Serialize>(summary: String, value: &T) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(summary)],
        structured_content: Some(json!(value)),
        is_error: Some(false),
        meta: None,
    }
}

// Domain errors are the caller's fault; anything else is ours
fn tool_err(msg: &'static str) -> impl FnOnce(anyhow::Error) -> McpError + Clone {
    move |err| {
        let data = Some(json!({ "error": format!("{:#}", err) }));
        if err.downcast_ref::<TreeError>().is_some() {
            McpError::invalid_params(msg, data)
        } else {
            McpError::internal_error(msg, data)
        }
    }
}

async fn serve_http(manager: Arc<TreeManager>, bind: &str, port: u16) -> anyhow::Result<()> {
    let service = StreamableHttpService::new(
        move || Ok(CharacterTreeServer::new(manager.clone())),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let router = axum::Router::new()
        .route("/health", axum::routing::get(|| async { "OK" }))
        .nest_service("/mcp", service);

    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "serving MCP over streamable HTTP at /mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mode = if cli.stream {
        TransportMode::Stream
    } else {
        TransportMode::Stdio
    };

    // stdio stays silent on stderr unless --log is given
    init_logging(mode, cli.log.as_deref())?;

    let config = StoreConfig::resolve(cli.db_path, cli.local_path)?;
    let session = Session::from_user(cli.user.as_deref());
    let store = open_store(&session, &config)?;
    let manager = Arc::new(TreeManager::new(store, config.layout));

    match mode {
        TransportMode::Stdio => {
            let svc = CharacterTreeServer::new(manager).serve(stdio()).await?;
            svc.waiting().await?;
        }
        TransportMode::Stream => serve_http(manager, &cli.bind, cli.port).await?,
    }

    Ok(())
}
