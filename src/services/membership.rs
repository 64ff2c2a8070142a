//! Membership ledger and join workflow.
//!
//! Per (trip, user) the lifecycle is NONE -> PENDING -> APPROVED, and reject or
//! remove deletes the row, returning the pair to NONE. The trip owner never
//! has a row; owner access is derived from `trips.owner_id`.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        membership::{MemberEntry, MemberList, Membership, MembershipStatus, ViewerStatus},
        trip::Trip,
    },
    services::{
        notifier::{ChangeKind, ChangeNotifier},
        trips::{fetch_trip, fetch_trip_by_code},
    },
};

pub async fn membership_status(
    db: &DbPool,
    trip_id: &str,
    user_id: &str,
) -> Result<Option<MembershipStatus>, AppError> {
    let status = sqlx::query_scalar::<_, MembershipStatus>(
        "SELECT status FROM trip_members WHERE trip_id = ?1 AND user_id = ?2",
    )
    .bind(trip_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(status)
}

pub async fn viewer_status(db: &DbPool, trip: &Trip, user_id: &str) -> Result<ViewerStatus, AppError> {
    if trip.is_owner(user_id) {
        return Ok(ViewerStatus::Owner);
    }
    let status = membership_status(db, &trip.id, user_id).await?;
    Ok(ViewerStatus::from_membership(status))
}

/// Owner, or a member whose request was approved.
pub async fn can_access(db: &DbPool, trip: &Trip, user_id: &str) -> Result<bool, AppError> {
    Ok(viewer_status(db, trip, user_id).await?.can_access())
}

/// Loads a trip for a trip-scoped read or write. A missing trip and a trip
/// the caller may not see are indistinguishable: both are `Unauthorized`.
pub async fn require_access(db: &DbPool, trip_id: &str, user_id: &str) -> Result<Trip, AppError> {
    let Some(trip) = fetch_trip(db, trip_id).await? else {
        return Err(AppError::Unauthorized);
    };
    if !can_access(db, &trip, user_id).await? {
        return Err(AppError::Unauthorized);
    }
    Ok(trip)
}

#[derive(Clone)]
pub struct MembershipLedger {
    db: DbPool,
    notifier: ChangeNotifier,
}

impl MembershipLedger {
    pub fn new(db: DbPool, notifier: ChangeNotifier) -> Self {
        Self { db, notifier }
    }

    pub async fn get(&self, membership_id: &str) -> Result<Option<Membership>, AppError> {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT id, trip_id, user_id, status, joined_at FROM trip_members WHERE id = ?1",
        )
        .bind(membership_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(membership)
    }

    pub async fn request_join(
        &self,
        trip_id: &str,
        user_id: &str,
    ) -> Result<MembershipStatus, AppError> {
        let trip = fetch_trip(&self.db, trip_id)
            .await?
            .ok_or(AppError::NotFound)?;
        self.join(&trip, user_id).await
    }

    pub async fn request_join_by_code(
        &self,
        invite_code: &str,
        user_id: &str,
    ) -> Result<(Trip, MembershipStatus), AppError> {
        let trip = fetch_trip_by_code(&self.db, invite_code)
            .await?
            .ok_or(AppError::NotFound)?;
        let status = self.join(&trip, user_id).await?;
        Ok((trip, status))
    }

    async fn join(&self, trip: &Trip, user_id: &str) -> Result<MembershipStatus, AppError> {
        if trip.is_owner(user_id) {
            return Err(AppError::conflict("You own this trip"));
        }
        let status = if trip.auto_approve_members {
            MembershipStatus::Approved
        } else {
            MembershipStatus::Pending
        };

        // The UNIQUE(trip_id, user_id) index is the duplicate check.
        sqlx::query(
            "INSERT INTO trip_members (id, trip_id, user_id, status, joined_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&trip.id)
        .bind(user_id)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.db)
        .await
        .map_err(|err| AppError::from_unique(err, "Already a member"))?;

        info!(trip_id = %trip.id, user_id, %status, "join requested");
        self.notifier.publish(&trip.id, ChangeKind::MembersChanged);
        Ok(status)
    }

    pub async fn approve(
        &self,
        trip_id: &str,
        membership_id: &str,
        caller_id: &str,
    ) -> Result<(), AppError> {
        let trip = fetch_trip(&self.db, trip_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !trip.is_owner(caller_id) {
            return Err(AppError::Forbidden);
        }

        let result = sqlx::query(
            "UPDATE trip_members SET status = ?1 WHERE id = ?2 AND trip_id = ?3 AND status = ?4",
        )
        .bind(MembershipStatus::Approved)
        .bind(membership_id)
        .bind(&trip.id)
        .bind(MembershipStatus::Pending)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        info!(trip_id, membership_id, "member approved");
        self.notifier.publish(&trip.id, ChangeKind::MembersChanged);
        Ok(())
    }

    /// Declines a pending request. The row is deleted, so the user may ask again.
    pub async fn reject(&self, membership_id: &str, caller_id: &str) -> Result<Membership, AppError> {
        self.delete_as_owner(membership_id, caller_id, "join request rejected")
            .await
    }

    pub async fn remove(&self, membership_id: &str, caller_id: &str) -> Result<Membership, AppError> {
        self.delete_as_owner(membership_id, caller_id, "member removed")
            .await
    }

    /// Rejects or removes a membership of `trip_id` on the owner's behalf.
    /// Ownership is settled before the row is looked up: a non-owner gets
    /// `Forbidden` whether or not the id exists.
    pub async fn dismiss(
        &self,
        trip_id: &str,
        membership_id: &str,
        caller_id: &str,
    ) -> Result<Membership, AppError> {
        let trip = fetch_trip(&self.db, trip_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !trip.is_owner(caller_id) {
            return Err(AppError::Forbidden);
        }
        let membership = self
            .get(membership_id)
            .await?
            .filter(|m| m.trip_id == trip.id)
            .ok_or(AppError::NotFound)?;
        match membership.status {
            MembershipStatus::Pending => self.reject(&membership.id, caller_id).await,
            _ => self.remove(&membership.id, caller_id).await,
        }
    }

    async fn delete_as_owner(
        &self,
        membership_id: &str,
        caller_id: &str,
        action: &'static str,
    ) -> Result<Membership, AppError> {
        let membership = self.get(membership_id).await?.ok_or(AppError::NotFound)?;
        let trip = fetch_trip(&self.db, &membership.trip_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !trip.is_owner(caller_id) {
            return Err(AppError::Forbidden);
        }

        sqlx::query("DELETE FROM trip_members WHERE id = ?1")
            .bind(membership_id)
            .execute(&self.db)
            .await?;

        info!(trip_id = %trip.id, membership_id, user_id = %membership.user_id, "{action}");
        self.notifier.publish(&trip.id, ChangeKind::MembersChanged);
        Ok(membership)
    }

    pub async fn leave(&self, trip_id: &str, user_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM trip_members WHERE trip_id = ?1 AND user_id = ?2")
            .bind(trip_id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        info!(trip_id, user_id, "member left trip");
        self.notifier.publish(trip_id, ChangeKind::MembersChanged);
        Ok(())
    }

    /// Approved members for anyone with access; pending requests for the owner only.
    pub async fn list_members(&self, trip_id: &str, caller_id: &str) -> Result<MemberList, AppError> {
        let trip = require_access(&self.db, trip_id, caller_id).await?;

        let owner_username =
            sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = ?1")
                .bind(&trip.owner_id)
                .fetch_one(&self.db)
                .await?;

        let rows = sqlx::query_as::<_, MemberEntry>(
            "SELECT m.id, m.user_id, u.username, m.status, m.joined_at \
             FROM trip_members m JOIN users u ON u.id = m.user_id \
             WHERE m.trip_id = ?1 ORDER BY m.joined_at ASC",
        )
        .bind(&trip.id)
        .fetch_all(&self.db)
        .await?;

        let is_owner = trip.is_owner(caller_id);
        let (members, pending): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .filter(|m| m.status != MembershipStatus::Rejected)
            .partition(|m| m.status == MembershipStatus::Approved);

        Ok(MemberList {
            owner_id: trip.owner_id,
            owner_username,
            members,
            pending: if is_owner { pending } else { Vec::new() },
        })
    }
}
