//! Tables every engine starts with.

/// Name of the users table.
pub const USERS: &str = "users";
/// Name of the sessions table.
pub const SESSIONS: &str = "sessions";
/// Name of the projects table.
pub const PROJECTS: &str = "projects";
/// Name of the files table.
pub const FILES: &str = "files";
/// Name of the glyph mappings table.
pub const GLYPH_MAPPINGS: &str = "glyph_mappings";
/// Name of the file change history table.
pub const FILE_CHANGES: &str = "file_changes";
/// Name of the encrypted credentials table.
pub const API_KEYS: &str = "api_keys";
/// Name of the usage counters table.
pub const USAGE_STATS: &str = "usage_stats";
/// Name of the backups table.
pub const BACKUPS: &str = "backups";
/// Name of the applied migrations table.
pub const MIGRATIONS: &str = "migrations";

/// Tables a restore never clears or replays.
pub const RESTORE_PROTECTED: &[&str] = &[USERS, SESSIONS, MIGRATIONS, BACKUPS];

/// Default database name.
pub const DEFAULT_DATABASE: &str = "glyphdb";

/// Built-in schema text. A caller schema declaring a table with the same
/// name replaces the built-in definition.
pub const BUILTIN_SCHEMA: &str = r"
DATABASE: glyphdb

TABLE: users
glyph: text unique not_null
username: text unique not_null
email: text unique
password_hash: text not_null
created: datetime not_null default(now())
active: boolean not_null default(true)

TABLE: sessions
token: text unique not_null
user_id: integer not_null foreign_key(users.id)
created: datetime not_null default(now())
expires: datetime not_null
metadata: json

TABLE: projects
glyph: text unique not_null
owner_id: integer foreign_key(users.id)
name: text not_null
path: text not_null
created: datetime not_null default(now())
updated: datetime

TABLE: files
project_id: integer not_null foreign_key(projects.id)
glyph: text not_null
path: text not_null
hash: text not_null
size: integer not_null
modified: datetime not_null
INDEX: files_project_glyph(project_id, glyph) unique

TABLE: glyph_mappings
glyph: text unique not_null
original_path: text not_null
compression_permille: integer
created: datetime not_null default(now())

TABLE: file_changes
file_id: integer not_null foreign_key(files.id)
glyph: text not_null
old_hash: text
new_hash: text not_null
user_id: integer
change_type: text not_null default('UPDATE')
timestamp: datetime not_null default(now())

TABLE: api_keys
user_id: integer not_null foreign_key(users.id)
provider: text not_null
provider_glyph: text not_null
ciphertext: binary not_null
usage_count: integer not_null default(0)
last_used: datetime
created: datetime not_null default(now())
INDEX: api_keys_user_glyph(user_id, provider_glyph) unique

TABLE: usage_stats
user_id: integer not_null foreign_key(users.id)
day: text not_null
glyph_type: text not_null
count: integer not_null default(0)
INDEX: usage_stats_user_day_type(user_id, day, glyph_type) unique

TABLE: backups
name: text not_null
user_id: integer not_null foreign_key(users.id)
created: datetime not_null
size: integer not_null
ciphertext: binary not_null
checksum: text not_null
schema_version: integer not_null
artifact_path: text

TABLE: migrations
version: integer unique not_null
name: text not_null
applied_at: datetime not_null
up: text not_null
down: text
";
