//! Built-in tool list used when the worker cannot be asked for its own.
//!
//! Mirrors every tool the worker registers. Kept in listing order so the
//! fallback catalog is deterministic.

use serde_json::{json, Map, Value};

use crate::tools::{CatalogSource, ToolCatalog, ToolDescriptor};

#[derive(Clone, Copy)]
enum Kind {
    Str,
    Int,
    Bool,
    StrList,
}

#[derive(Clone, Copy)]
struct Param {
    name: &'static str,
    kind: Kind,
    description: &'static str,
    required: bool,
}

const fn req(name: &'static str, kind: Kind, description: &'static str) -> Param {
    Param {
        name,
        kind,
        description,
        required: true,
    }
}

const fn opt(name: &'static str, kind: Kind, description: &'static str) -> Param {
    Param {
        name,
        kind,
        description,
        required: false,
    }
}

fn schema(params: &[Param]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in params {
        let mut prop = match param.kind {
            Kind::Str => json!({"type": "string"}),
            Kind::Int => json!({"type": "integer"}),
            Kind::Bool => json!({"type": "boolean"}),
            Kind::StrList => json!({"type": "array", "items": {"type": "string"}}),
        };
        if !param.description.is_empty() {
            prop["description"] = Value::from(param.description);
        }
        properties.insert(param.name.to_string(), prop);
        if param.required {
            required.push(Value::from(param.name));
        }
    }

    let mut schema = json!({"type": "object", "properties": properties});
    if !required.is_empty() {
        schema["required"] = Value::Array(required);
    }
    schema
}

fn tool(name: &str, description: &str, params: &[Param]) -> ToolDescriptor {
    ToolDescriptor::new(name, description, schema(params))
}

use Kind::{Bool, Int, Str, StrList};

/// Every tool the worker is known to provide.
#[must_use]
pub fn fallback_tools() -> Vec<ToolDescriptor> {
    vec![
        tool(
            "drive_search",
            "Search for files in Google Drive",
            &[req("query", Str, "Full-text search query")],
        ),
        tool(
            "drive_read",
            "Read the contents of a file from Google Drive using its fileId",
            &[req("fileId", Str, "ID of the file")],
        ),
        tool(
            "drive_edit",
            "Edit the content of an existing file in Google Drive",
            &[
                req("fileId", Str, "ID of the file"),
                req("content", Str, "New file content"),
            ],
        ),
        tool(
            "drive_delete",
            "Delete a file from Google Drive using its fileId",
            &[req("fileId", Str, "ID of the file")],
        ),
        tool(
            "drive_upload_file",
            "Upload a file to Google Drive",
            &[
                req("file_path", Str, "Path to the file to upload (from uploads directory)"),
                opt("file_name", Str, "Custom name for the file"),
                opt("folder_id", Str, "Folder ID to upload to (defaults to root)"),
            ],
        ),
        tool(
            "drive_move",
            "Move a file to a different folder in Google Drive",
            &[
                req("fileId", Str, "ID of the file"),
                req("targetFolderId", Str, "ID of the destination folder"),
            ],
        ),
        tool(
            "drive_share_file",
            "Share a Google Drive file with someone and get shareable link",
            &[
                req("fileId", Str, "ID of the file to share"),
                req("email", Str, "Email address to share with"),
                opt("role", Str, "Permission level ('reader', 'writer', 'commenter')"),
                opt("send_notification", Bool, "Whether to send email notification"),
            ],
        ),
        tool(
            "drive_get_shareable_link",
            "Get shareable link for a Google Drive file",
            &[
                req("fileId", Str, "ID of the file"),
                opt("make_public", Bool, "Whether to make file publicly accessible"),
            ],
        ),
        tool(
            "drive_create_folder",
            "Create a new folder in Google Drive",
            &[
                req("name", Str, "Name of the folder to create"),
                opt("parent_folder_id", Str, "ID of parent folder (root if omitted)"),
            ],
        ),
        tool(
            "drive_list_folder_contents",
            "List all files and folders within a specific folder",
            &[
                req("folder_id", Str, "ID of the folder ('root' for root directory)"),
                opt("include_subfolders", Bool, "Whether to include subfolders"),
            ],
        ),
        tool(
            "drive_list_all_files",
            "List all files and folders in Google Drive",
            &[
                opt("max_results", Int, "Maximum number of items to return (max 1000)"),
                opt("file_type", Str, "Filter by file type ('folder', 'document', 'pdf', ...)"),
                opt("order_by", Str, "Sort order ('name', 'modifiedTime', 'createdTime')"),
            ],
        ),
        tool(
            "drive_create",
            "Create a new file in Google Drive. Handles Google Docs, PDFs, and plain text.",
            &[
                req("name", Str, "Name of the file"),
                req("mimeType", Str, "MIME type of the new file"),
                req("content", Str, "File content"),
                opt("folder_id", Str, "Folder ID to create the file in"),
            ],
        ),
        tool(
            "gmail_list_messages",
            "List recent emails with clean, AI-friendly format",
            &[
                opt("max_results", Int, ""),
                opt("query", Str, "Gmail search query"),
            ],
        ),
        tool(
            "gmail_read_message_without_attachments",
            "Read email content in clean, AI-friendly format with optional attachment info",
            &[
                req("message_id", Str, ""),
                opt("include_attachments_info", Bool, ""),
            ],
        ),
        tool(
            "gmail_find_messages_with_attachments",
            "Find Gmail messages with attachments based on search criteria",
            &[
                req("max_results", Int, "Maximum number of messages to return"),
                opt("query", Str, "Custom Gmail search query"),
                opt("sender", Str, "Filter by sender email/name"),
                opt("subject_contains", Str, "Filter by subject containing text"),
                opt("date_after", Str, "Messages after date (YYYY/MM/DD)"),
                opt("date_before", Str, "Messages before date (YYYY/MM/DD)"),
                opt("attachment_type", Str, "Filter by attachment extension"),
                opt("mime_type", Str, "Filter by exact MIME type"),
            ],
        ),
        tool(
            "gmail_read_attchment_content",
            "Read and extract text from a PDF, DOCX, or TXT attachment in a Gmail message",
            &[
                req("message_id", Str, ""),
                opt("attachment_id", Str, "Defaults to the first supported attachment"),
            ],
        ),
        tool(
            "gmail_search_and_summarize",
            "Search emails with clean, summarized results",
            &[
                opt("query", Str, ""),
                opt("sender", Str, ""),
                opt("recipient", Str, ""),
                opt("subject_contains", Str, ""),
                opt("max_results", Int, ""),
            ],
        ),
        tool(
            "gmail_send_message",
            "Send a simple email",
            &[
                req("to", Str, ""),
                req("subject", Str, ""),
                req("body", Str, ""),
            ],
        ),
        tool("gmail_list_labels", "List Gmail labels in clean format", &[]),
        tool(
            "gmail_modify_labels",
            "Add or remove labels - returns simple confirmation",
            &[
                req("message_id", Str, ""),
                opt("add_labels", StrList, ""),
                opt("remove_labels", StrList, ""),
            ],
        ),
        tool(
            "gmail_delete_message",
            "Delete an email - returns simple confirmation",
            &[req("message_id", Str, "")],
        ),
        tool(
            "calendar_list_events",
            "List upcoming calendar events within a time range",
            &[
                req("timeMin", Str, "RFC3339 start of range"),
                req("timeMax", Str, "RFC3339 end of range"),
                opt("maxResults", Int, ""),
            ],
        ),
        tool(
            "calendar_create_event_with_invitations",
            "Create a calendar event and automatically send invitations to attendees",
            &[
                req("summary", Str, "Event title"),
                req("startTime", Str, "RFC3339 start time"),
                req("endTime", Str, "RFC3339 end time"),
                opt("attendees", StrList, "Attendee emails"),
                opt("location", Str, ""),
                opt("description", Str, ""),
                opt("send_invitations", Bool, "Whether to send email invitations"),
            ],
        ),
        tool(
            "calendar_get_availability",
            "Get free/busy information for primary calendar",
            &[
                req("timeMin", Str, "RFC3339 start of range"),
                req("timeMax", Str, "RFC3339 end of range"),
            ],
        ),
        tool(
            "calendar_update_event",
            "Update an existing calendar event",
            &[
                req("event_id", Str, "ID of the event to update"),
                opt("summary", Str, "New event title"),
                opt("startTime", Str, "New RFC3339 start time"),
                opt("endTime", Str, "New RFC3339 end time"),
                opt("attendees", StrList, "New list of attendee emails"),
                opt("location", Str, "New event location"),
                opt("description", Str, "New event description"),
            ],
        ),
        tool(
            "calendar_delete_event",
            "Delete a calendar event",
            &[req("event_id", Str, "ID of the event to delete")],
        ),
    ]
}

/// Catalog built from [`fallback_tools`].
#[must_use]
pub fn fallback_catalog() -> ToolCatalog {
    ToolCatalog::new(fallback_tools(), CatalogSource::Fallback)
}
