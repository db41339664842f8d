// Backend action names: derived from contracts/rpc-actions.json.

// ── Chat ───────────────────────────────────────────────────────────
pub const SEND_MESSAGE: &str = "send_message";

// ── Solutions ──────────────────────────────────────────────────────
pub const VALIDATE_SOLUTION: &str = "validate_solution";
pub const LAUNCH_FAST_SEARCH: &str = "launch_fast_search";

// ── Dashboard ──────────────────────────────────────────────────────
pub const GET_KPIS: &str = "get_kpis";

// ── Account ────────────────────────────────────────────────────────
pub const GET_USER_ROLE: &str = "get_user_role";

/// Every action this client dispatches.
pub const CLIENT_ACTIONS: &[&str] = &[
    SEND_MESSAGE,
    VALIDATE_SOLUTION,
    LAUNCH_FAST_SEARCH,
    GET_KPIS,
    GET_USER_ROLE,
];

// ── Change-feed tables ─────────────────────────────────────────────
pub const TABLE_CHAT_MESSAGES: &str = "chat_messages";
pub const TABLE_SOLUTIONS: &str = "solutions";
pub const TABLE_SUPPLIERS: &str = "suppliers";
pub const TABLE_PRODUCTS: &str = "products";

/// Tables the client keeps live through the change feed.
pub const SYNCED_TABLES: &[&str] =
    &[TABLE_CHAT_MESSAGES, TABLE_SOLUTIONS, TABLE_SUPPLIERS, TABLE_PRODUCTS];
