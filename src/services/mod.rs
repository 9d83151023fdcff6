/// Process-wide leaderboard snapshot caching.
pub mod leaderboard_cache;
/// Individual and team rank computation.
pub mod rank_service;
/// Debounced write synchronisation to the backing store.
pub mod sync_service;
/// Table bootstrap and metadata management.
pub mod table_service;
