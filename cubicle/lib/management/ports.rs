use std::{fmt, path::Path};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite, SqliteConnection};

use crate::{CubicleError, CubicleResult};

use super::{init_db, PORT_DB_MIGRATOR};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A closed interval of host ports reserved for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct PortRange {
    /// First port of the range.
    start: u16,

    /// Last port of the range, inclusive.
    end: u16,
}

/// A persisted port range together with the tenant that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PortAllocation {
    /// The owning tenant.
    tenant_id: String,

    /// The reserved range.
    range: PortRange,

    /// When the allocation was recorded, as stored by SQLite.
    created_at: Option<String>,
}

/// Persistent first-fit allocator of contiguous port ranges keyed by tenant.
///
/// Allocations live in the `port_allocations` table of a SQLite database. Every allocation runs in
/// a `BEGIN IMMEDIATE` transaction, so two allocators sharing a database file, or two tasks sharing
/// one allocator, can never observe the same free gap.
#[derive(Debug, Clone, CopyGetters)]
pub struct PortRangeAllocator {
    pool: Pool<Sqlite>,

    /// Lowest port handed out.
    #[getset(get_copy = "pub with_prefix")]
    base_port: u16,

    /// Highest port handed out.
    #[getset(get_copy = "pub with_prefix")]
    max_port: u16,

    /// Width of the range given to each tenant.
    #[getset(get_copy = "pub with_prefix")]
    range_size: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PortRange {
    /// Creates a new range. Fails if `end` comes before `start`.
    pub fn new(start: u16, end: u16) -> CubicleResult<Self> {
        if end < start {
            return Err(CubicleError::InvalidConfig(format!(
                "port range end {end} is before start {start}"
            )));
        }

        Ok(Self { start, end })
    }

    /// Number of ports in the range.
    pub fn len(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    /// Always false, a range holds at least one port.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the port at `offset` from the start of the range, if it falls inside the range.
    pub fn port(&self, offset: u16) -> Option<u16> {
        let port = self.start.checked_add(offset)?;
        (port <= self.end).then_some(port)
    }

    /// Returns true if the two closed intervals share at least one port.
    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl PortAllocation {
    fn from_row(row: &SqliteRow) -> CubicleResult<Self> {
        Ok(Self {
            tenant_id: row.try_get("tenant_id")?,
            range: range_from_row(row)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl PortRangeAllocator {
    /// Opens (creating and migrating if needed) the allocation database at `db_path`.
    pub async fn open(
        db_path: impl AsRef<Path>,
        base_port: u16,
        max_port: u16,
        range_size: u16,
    ) -> CubicleResult<Self> {
        let pool = init_db(db_path, &PORT_DB_MIGRATOR).await?;
        Ok(Self::with_pool(pool, base_port, max_port, range_size))
    }

    /// Creates an allocator over an already migrated pool.
    pub fn with_pool(pool: Pool<Sqlite>, base_port: u16, max_port: u16, range_size: u16) -> Self {
        Self {
            pool,
            base_port,
            max_port,
            range_size,
        }
    }

    /// Returns the tenant's range, reserving a fresh one of the configured width if it has none.
    ///
    /// Calling this repeatedly for the same tenant always yields the same range.
    pub async fn allocate(&self, tenant_id: &str) -> CubicleResult<PortRange> {
        match self.reserve(tenant_id, self.range_size).await {
            Ok(range) => {
                tracing::info!(tenant = tenant_id, %range, "allocated port range");
                Ok(range)
            }
            Err(CubicleError::AlreadyAllocated { tenant, range }) => {
                tracing::warn!(tenant = %tenant, %range, "tenant already holds a port range, reusing it");
                Ok(range)
            }
            Err(e) => Err(e),
        }
    }

    /// Reserves a new range of `size` ports for the tenant.
    ///
    /// Unlike [`allocate`](Self::allocate), this fails with [`CubicleError::AlreadyAllocated`] if
    /// the tenant already holds a range.
    pub async fn reserve(&self, tenant_id: &str, size: u16) -> CubicleResult<PortRange> {
        if size == 0 {
            return Err(CubicleError::InvalidConfig(
                "port range size must be at least 1".to_string(),
            ));
        }

        // Rolls back on drop, so a cancelled caller never leaves the write lock held.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let range = self.reserve_locked(&mut *tx, tenant_id, size).await?;
        tx.commit().await?;

        Ok(range)
    }

    /// Deletes the tenant's allocation, failing with [`CubicleError::NotAllocated`] if none exists.
    pub async fn deallocate(&self, tenant_id: &str) -> CubicleResult<()> {
        let deleted = sqlx::query("DELETE FROM port_allocations WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(CubicleError::NotAllocated(tenant_id.to_string()));
        }

        tracing::info!(tenant = tenant_id, "released port range");
        Ok(())
    }

    /// Returns the tenant's range.
    pub async fn lookup(&self, tenant_id: &str) -> CubicleResult<PortRange> {
        let row = sqlx::query("SELECT start_port, end_port FROM port_allocations WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => range_from_row(&row),
            None => Err(CubicleError::NotAllocated(tenant_id.to_string())),
        }
    }

    /// Lists every allocation ordered by start port.
    pub async fn list(&self) -> CubicleResult<Vec<PortAllocation>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, start_port, end_port, CAST(created_at AS TEXT) AS created_at
            FROM port_allocations
            ORDER BY start_port
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(PortAllocation::from_row).collect()
    }

    async fn reserve_locked(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        size: u16,
    ) -> CubicleResult<PortRange> {
        let existing =
            sqlx::query("SELECT start_port, end_port FROM port_allocations WHERE tenant_id = ?")
                .bind(tenant_id)
                .fetch_optional(&mut *conn)
                .await?;

        if let Some(row) = existing {
            return Err(CubicleError::AlreadyAllocated {
                tenant: tenant_id.to_string(),
                range: range_from_row(&row)?,
            });
        }

        let rows = sqlx::query("SELECT start_port, end_port FROM port_allocations ORDER BY start_port")
            .fetch_all(&mut *conn)
            .await?;
        let ranges = rows
            .iter()
            .map(range_from_row)
            .collect::<CubicleResult<Vec<_>>>()?;

        let range = find_first_fit(&ranges, size, self.base_port, self.max_port)
            .ok_or(CubicleError::NoAvailableRange(size))?;

        sqlx::query(
            r#"
            INSERT INTO port_allocations (tenant_id, start_port, end_port, created_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(tenant_id)
        .bind(i64::from(range.start))
        .bind(i64::from(range.end))
        .execute(&mut *conn)
        .await?;

        Ok(range)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Finds the lowest block of `size` consecutive ports in `[base, max]` that overlaps none of
/// `ranges`.
///
/// The cursor starts at `base` and only ever moves forward, past the end of each range it meets.
pub fn find_first_fit(ranges: &[PortRange], size: u16, base: u16, max: u16) -> Option<PortRange> {
    if size == 0 {
        return None;
    }

    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| r.start);

    let size = u32::from(size);
    let mut cursor = u32::from(base);
    for range in &sorted {
        if cursor + size - 1 < u32::from(range.start) {
            break;
        }
        cursor = cursor.max(u32::from(range.end) + 1);
    }

    let end = cursor + size - 1;
    if end > u32::from(max) {
        return None;
    }

    Some(PortRange {
        start: u16::try_from(cursor).ok()?,
        end: u16::try_from(end).ok()?,
    })
}

fn range_from_row(row: &SqliteRow) -> CubicleResult<PortRange> {
    let start: i64 = row.try_get("start_port")?;
    let end: i64 = row.try_get("end_port")?;
    PortRange::new(
        u16::try_from(start).map_err(CubicleError::custom)?,
        u16::try_from(end).map_err(CubicleError::custom)?,
    )
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.start, self.end)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use tempfile::{tempdir, TempDir};

    use super::*;

    async fn allocator(range_size: u16, max_port: u16) -> CubicleResult<(TempDir, PortRangeAllocator)> {
        let temp_dir = tempdir()?;
        let allocator =
            PortRangeAllocator::open(temp_dir.path().join("ports.db"), 9000, max_port, range_size)
                .await?;
        Ok((temp_dir, allocator))
    }

    fn range(start: u16, end: u16) -> PortRange {
        PortRange { start, end }
    }

    #[test]
    fn test_find_first_fit_empty() {
        assert_eq!(find_first_fit(&[], 5, 9000, 65535), Some(range(9000, 9004)));
    }

    #[test]
    fn test_find_first_fit_fills_gap() {
        let ranges = [range(9000, 9009), range(9020, 9029)];
        assert_eq!(
            find_first_fit(&ranges, 10, 9000, 65535),
            Some(range(9010, 9019))
        );

        // Gap too small for 11 ports.
        assert_eq!(
            find_first_fit(&ranges, 11, 9000, 65535),
            Some(range(9030, 9040))
        );
    }

    #[test]
    fn test_find_first_fit_unsorted_and_below_base() {
        let ranges = [range(9005, 9009), range(8000, 8004), range(9000, 9004)];
        assert_eq!(find_first_fit(&ranges, 5, 9000, 65535), Some(range(9010, 9014)));
    }

    #[test]
    fn test_find_first_fit_cursor_never_moves_backwards() {
        // The second range ends before the first, it must not pull the cursor back into [9000, 9049].
        let ranges = [range(9000, 9049), range(9010, 9014)];
        assert_eq!(find_first_fit(&ranges, 5, 9000, 65535), Some(range(9050, 9054)));
    }

    #[test]
    fn test_find_first_fit_exhausted() {
        let ranges = [range(9000, 9004)];
        assert_eq!(find_first_fit(&ranges, 5, 9000, 9008), None);
        assert_eq!(find_first_fit(&ranges, 5, 9000, 9009), Some(range(9005, 9009)));
        assert_eq!(find_first_fit(&[], 5, 65533, 65535), None);
        assert_eq!(find_first_fit(&[], 0, 9000, 65535), None);
    }

    #[test]
    fn test_port_range_helpers() -> CubicleResult<()> {
        let r = PortRange::new(9000, 9004)?;
        assert_eq!(r.len(), 5);
        assert_eq!(r.port(0), Some(9000));
        assert_eq!(r.port(4), Some(9004));
        assert_eq!(r.port(5), None);
        assert_eq!(r.to_string(), "[9000-9004]");
        assert!(r.overlaps(&range(9004, 9010)));
        assert!(!r.overlaps(&range(9005, 9010)));
        assert!(PortRange::new(10, 9).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_allocate_first_tenant_gets_base() -> CubicleResult<()> {
        let (_dir, allocator) = allocator(5, 65535).await?;

        let alice = allocator.allocate("alice").await?;
        assert_eq!(alice, range(9000, 9004));

        let bob = allocator.allocate("bob").await?;
        assert_eq!(bob, range(9005, 9009));

        assert_eq!(allocator.lookup("alice").await?, alice);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_allocate_is_idempotent() -> CubicleResult<()> {
        let (_dir, allocator) = allocator(5, 65535).await?;

        let first = allocator.allocate("alice").await?;
        let second = allocator.allocate("alice").await?;
        assert_eq!(first, second);
        assert_eq!(allocator.list().await?.len(), 1);

        match allocator.reserve("alice", 5).await {
            Err(CubicleError::AlreadyAllocated { tenant, range }) => {
                assert_eq!(tenant, "alice");
                assert_eq!(range, first);
            }
            other => panic!("expected AlreadyAllocated, got {other:?}"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_allocate_reuses_freed_gap() -> CubicleResult<()> {
        let (_dir, allocator) = allocator(10, 65535).await?;

        allocator.allocate("a").await?;
        allocator.allocate("b").await?;
        allocator.allocate("c").await?;
        allocator.deallocate("b").await?;

        assert_eq!(allocator.allocate("d").await?, range(9010, 9019));
        Ok(())
    }

    #[tokio::test]
    async fn test_allocate_exhausted() -> CubicleResult<()> {
        let (_dir, allocator) = allocator(5, 9009).await?;

        allocator.allocate("a").await?;
        allocator.allocate("b").await?;
        assert!(matches!(
            allocator.allocate("c").await,
            Err(CubicleError::NoAvailableRange(5))
        ));

        // A failed allocation leaves nothing behind.
        assert!(matches!(
            allocator.lookup("c").await,
            Err(CubicleError::NotAllocated(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_deallocate_unknown_tenant() -> CubicleResult<()> {
        let (_dir, allocator) = allocator(5, 65535).await?;

        let err = allocator.deallocate("ghost").await.unwrap_err();
        assert!(matches!(err, CubicleError::NotAllocated(ref t) if t == "ghost"));
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_allocations_never_overlap() -> CubicleResult<()> {
        let (_dir, allocator) = allocator(5, 65535).await?;

        for round in 0..4 {
            for i in 0..12 {
                allocator.allocate(&format!("tenant-{i}")).await?;
            }
            for i in (round % 3..12).step_by(3) {
                allocator.deallocate(&format!("tenant-{i}")).await?;
            }

            let allocations = allocator.list().await?;
            for (i, a) in allocations.iter().enumerate() {
                for b in &allocations[i + 1..] {
                    assert!(
                        !a.get_range().overlaps(b.get_range()),
                        "{} and {} overlap",
                        a.get_range(),
                        b.get_range()
                    );
                }
            }
        }

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_cancelled_allocation_releases_transaction() -> CubicleResult<()> {
        let (_dir, allocator) = allocator(5, 65535).await?;

        // Drop the allocation at every stage it can be suspended in, including mid-transaction.
        for polls in 1..=20 {
            let dropped = format!("dropped-{polls}");
            let mut pending = Box::pin(allocator.allocate(&dropped));
            for _ in 0..polls {
                if futures::poll!(pending.as_mut()).is_ready() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            drop(pending);

            let range = allocator.allocate(&format!("tenant-{polls}")).await?;
            assert_eq!(allocator.lookup(&format!("tenant-{polls}")).await?, range);
        }

        let allocations = allocator.list().await?;
        for (i, a) in allocations.iter().enumerate() {
            for b in &allocations[i + 1..] {
                assert!(!a.get_range().overlaps(b.get_range()));
            }
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_are_disjoint() -> CubicleResult<()> {
        let (_dir, allocator) = allocator(5, 65535).await?;

        let mut handles = Vec::new();
        for i in 0..16 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                allocator.allocate(&format!("tenant-{i}")).await
            }));
        }

        let mut starts = HashSet::new();
        for handle in handles {
            let range = handle.await.map_err(CubicleError::custom)??;
            assert!(starts.insert(range.get_start()), "duplicate range {range}");
        }

        assert_eq!(allocator.list().await?.len(), 16);
        Ok(())
    }
}
