use chrono::Utc;
use sqlx::FromRow;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        membership::{MembershipStatus, ViewerStatus},
        trip::{InvitePreview, NewTrip, Trip, TripChanges, TripDetails, TripSummary, MIN_TRIP_NAME_LEN},
    },
    services::notifier::{ChangeKind, ChangeNotifier},
};

const TRIP_COLUMNS: &str = "t.id, t.name, t.description, t.owner_id, t.invite_code, t.is_public, \
     t.auto_approve_members, t.destination, t.start_date, t.end_date, t.created_at, t.updated_at";

/// Trip listing query; `?1` is always the viewer.
fn summary_query(filter: &str) -> String {
    format!(
        "SELECT {TRIP_COLUMNS}, u.username AS owner_username, \
         (SELECT COUNT(*) FROM trip_members m WHERE m.trip_id = t.id AND m.status = 'approved') + 1 AS member_count, \
         (SELECT COUNT(*) FROM tasks k WHERE k.trip_id = t.id) AS task_count, \
         (SELECT m.status FROM trip_members m WHERE m.trip_id = t.id AND m.user_id = ?1) AS viewer_membership \
         FROM trips t JOIN users u ON u.id = t.owner_id \
         WHERE {filter} \
         ORDER BY t.created_at DESC"
    )
}

#[derive(FromRow)]
struct SummaryRow {
    #[sqlx(flatten)]
    trip: Trip,
    owner_username: String,
    member_count: i64,
    task_count: i64,
    viewer_membership: Option<MembershipStatus>,
}

impl SummaryRow {
    fn into_summary(self, viewer_id: &str) -> TripSummary {
        let membership_status = if self.trip.is_owner(viewer_id) {
            ViewerStatus::Owner
        } else {
            ViewerStatus::from_membership(self.viewer_membership)
        };
        TripSummary {
            trip: self.trip,
            owner_username: self.owner_username,
            member_count: self.member_count,
            task_count: self.task_count,
            membership_status,
        }
    }
}

pub async fn fetch_trip(db: &DbPool, trip_id: &str) -> Result<Option<Trip>, AppError> {
    let trip = sqlx::query_as::<_, Trip>(&format!(
        "SELECT {TRIP_COLUMNS} FROM trips t WHERE t.id = ?1"
    ))
    .bind(trip_id)
    .fetch_optional(db)
    .await?;
    Ok(trip)
}

/// The invite code is the only credential needed to find a trip this way.
pub async fn fetch_trip_by_code(db: &DbPool, code: &str) -> Result<Option<Trip>, AppError> {
    let trip = sqlx::query_as::<_, Trip>(&format!(
        "SELECT {TRIP_COLUMNS} FROM trips t WHERE t.invite_code = ?1"
    ))
    .bind(code.trim())
    .fetch_optional(db)
    .await?;
    Ok(trip)
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn validate_name(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.chars().count() < MIN_TRIP_NAME_LEN {
        return Err(AppError::bad_request(format!(
            "Trip name must be at least {MIN_TRIP_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

#[derive(Clone)]
pub struct TripRegistry {
    db: DbPool,
    notifier: ChangeNotifier,
    public_base_url: Url,
}

impl TripRegistry {
    pub fn new(db: DbPool, notifier: ChangeNotifier, public_base_url: Url) -> Self {
        Self {
            db,
            notifier,
            public_base_url,
        }
    }

    pub async fn create(&self, owner_id: &str, input: NewTrip) -> Result<Trip, AppError> {
        let name = validate_name(&input.name)?;
        if let (Some(start), Some(end)) = (input.start_date, input.end_date) {
            if start > end {
                return Err(AppError::bad_request("End date must be after start date"));
            }
        }

        let now = Utc::now();
        let trip = Trip {
            id: Uuid::new_v4().to_string(),
            name,
            description: normalize_optional(input.description),
            owner_id: owner_id.to_string(),
            invite_code: Uuid::new_v4().simple().to_string(),
            is_public: input.is_public,
            auto_approve_members: input.auto_approve_members,
            destination: normalize_optional(input.destination),
            start_date: input.start_date,
            end_date: input.end_date,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO trips (id, name, description, owner_id, invite_code, is_public, auto_approve_members, \
             destination, start_date, end_date, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&trip.id)
        .bind(&trip.name)
        .bind(&trip.description)
        .bind(&trip.owner_id)
        .bind(&trip.invite_code)
        .bind(trip.is_public)
        .bind(trip.auto_approve_members)
        .bind(&trip.destination)
        .bind(trip.start_date)
        .bind(trip.end_date)
        .bind(trip.created_at)
        .bind(trip.updated_at)
        .execute(&self.db)
        .await?;

        info!(trip_id = %trip.id, owner_id, "trip created");
        Ok(trip)
    }

    async fn owned_trip(&self, trip_id: &str, caller_id: &str) -> Result<Trip, AppError> {
        let trip = fetch_trip(&self.db, trip_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !trip.is_owner(caller_id) {
            return Err(AppError::Forbidden);
        }
        Ok(trip)
    }

    pub async fn update(
        &self,
        trip_id: &str,
        caller_id: &str,
        changes: TripChanges,
    ) -> Result<Trip, AppError> {
        let mut trip = self.owned_trip(trip_id, caller_id).await?;

        if let Some(name) = changes.name {
            trip.name = validate_name(&name)?;
        }
        if let Some(description) = changes.description {
            trip.description = normalize_optional(Some(description));
        }
        if let Some(is_public) = changes.is_public {
            trip.is_public = is_public;
        }
        if let Some(auto_approve) = changes.auto_approve_members {
            trip.auto_approve_members = auto_approve;
        }
        trip.updated_at = Utc::now();

        sqlx::query(
            "UPDATE trips SET name = ?1, description = ?2, is_public = ?3, auto_approve_members = ?4, \
             updated_at = ?5 WHERE id = ?6",
        )
        .bind(&trip.name)
        .bind(&trip.description)
        .bind(trip.is_public)
        .bind(trip.auto_approve_members)
        .bind(trip.updated_at)
        .bind(&trip.id)
        .execute(&self.db)
        .await?;

        info!(trip_id, "trip settings updated");
        self.notifier.publish(&trip.id, ChangeKind::TripUpdated);
        Ok(trip)
    }

    /// Deletes the trip with everything hanging off it in one transaction.
    pub async fn delete(&self, trip_id: &str, caller_id: &str) -> Result<(), AppError> {
        let trip = self.owned_trip(trip_id, caller_id).await?;

        let mut tx = self.db.begin().await?;
        let packed = sqlx::query(
            "DELETE FROM packing_records WHERE task_id IN (SELECT id FROM tasks WHERE trip_id = ?1)",
        )
        .bind(&trip.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let tasks = sqlx::query("DELETE FROM tasks WHERE trip_id = ?1")
            .bind(&trip.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let folders = sqlx::query("DELETE FROM folders WHERE trip_id = ?1")
            .bind(&trip.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let members = sqlx::query("DELETE FROM trip_members WHERE trip_id = ?1")
            .bind(&trip.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM trips WHERE id = ?1")
            .bind(&trip.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            trip_id,
            tasks, folders, members, packed, "trip deleted with its contents"
        );
        self.notifier.publish(&trip.id, ChangeKind::TripDeleted);
        Ok(())
    }

    pub async fn get_by_invite_code(&self, code: &str) -> Result<Option<Trip>, AppError> {
        fetch_trip_by_code(&self.db, code).await
    }

    pub async fn invite_preview(
        &self,
        code: &str,
        viewer_id: &str,
    ) -> Result<InvitePreview, AppError> {
        let trip = self
            .get_by_invite_code(code)
            .await?
            .ok_or(AppError::NotFound)?;
        let summary = self
            .summary(&trip.id, viewer_id)
            .await?
            .ok_or(AppError::NotFound)?;
        Ok(InvitePreview {
            id: trip.id,
            name: trip.name,
            description: trip.description,
            destination: trip.destination,
            start_date: trip.start_date,
            end_date: trip.end_date,
            owner_username: summary.owner_username,
            auto_approve_members: trip.auto_approve_members,
            membership_status: summary.membership_status,
        })
    }

    /// Trips the viewer may discover: every public trip, plus private ones
    /// they own or already have a membership row for.
    pub async fn list_discoverable(&self, viewer_id: &str) -> Result<Vec<TripSummary>, AppError> {
        let rows = sqlx::query_as::<_, SummaryRow>(&summary_query(
            "t.is_public = 1 OR t.owner_id = ?1 \
             OR EXISTS (SELECT 1 FROM trip_members m WHERE m.trip_id = t.id AND m.user_id = ?1)",
        ))
        .bind(viewer_id)
        .fetch_all(&self.db)
        .await?;
        debug!(viewer_id, count = rows.len(), "discoverable trips listed");
        Ok(rows
            .into_iter()
            .map(|row| row.into_summary(viewer_id))
            .collect())
    }

    /// Trips the user owns or is an approved member of.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<TripSummary>, AppError> {
        let rows = sqlx::query_as::<_, SummaryRow>(&summary_query(
            "t.owner_id = ?1 OR EXISTS (SELECT 1 FROM trip_members m \
             WHERE m.trip_id = t.id AND m.user_id = ?1 AND m.status = 'approved')",
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_summary(user_id))
            .collect())
    }

    async fn summary(&self, trip_id: &str, viewer_id: &str) -> Result<Option<TripSummary>, AppError> {
        let row = sqlx::query_as::<_, SummaryRow>(&summary_query("t.id = ?2"))
            .bind(viewer_id)
            .bind(trip_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|row| row.into_summary(viewer_id)))
    }

    pub async fn details(&self, trip_id: &str, viewer_id: &str) -> Result<TripDetails, AppError> {
        let summary = self
            .summary(trip_id, viewer_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !summary.membership_status.can_access() {
            return Err(AppError::Unauthorized);
        }
        let invite_link = if summary.membership_status == ViewerStatus::Owner {
            Some(self.invite_link(&summary.trip)?)
        } else {
            None
        };
        Ok(TripDetails {
            summary,
            invite_link,
        })
    }

    pub fn invite_link(&self, trip: &Trip) -> Result<String, AppError> {
        self.public_base_url
            .join(&format!("join/{}", trip.invite_code))
            .map(String::from)
            .map_err(|err| AppError::Other(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool,
        services::{membership::MembershipLedger, test_support::user},
    };
    use chrono::NaiveDate;

    fn registry(db: &DbPool) -> TripRegistry {
        TripRegistry::new(
            db.clone(),
            ChangeNotifier::new(16),
            Url::parse("https://trippack.test/").unwrap(),
        )
    }

    fn new_trip(name: &str, is_public: bool) -> NewTrip {
        NewTrip {
            name: name.into(),
            is_public,
            ..NewTrip::default()
        }
    }

    #[tokio::test]
    async fn create_validates_and_issues_unique_invite_codes() {
        let db = test_pool().await;
        let owner = user(&db, "olivia").await;
        let trips = registry(&db);

        assert!(matches!(
            trips.create(&owner, new_trip("x", true)).await,
            Err(AppError::BadRequest(_))
        ));
        let backwards = NewTrip {
            start_date: NaiveDate::from_ymd_opt(2026, 6, 10),
            end_date: NaiveDate::from_ymd_opt(2026, 6, 1),
            ..new_trip("Alps", true)
        };
        assert!(matches!(
            trips.create(&owner, backwards).await,
            Err(AppError::BadRequest(_))
        ));

        let a = trips.create(&owner, new_trip("  Alps  ", true)).await.unwrap();
        let b = trips.create(&owner, new_trip("Coast", true)).await.unwrap();
        assert_eq!(a.name, "Alps");
        assert_eq!(a.invite_code.len(), 32);
        assert_ne!(a.invite_code, b.invite_code);
        assert_eq!(
            trips.get_by_invite_code(&a.invite_code).await.unwrap(),
            Some(a)
        );
        assert_eq!(trips.get_by_invite_code("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn only_the_owner_updates_settings() {
        let db = test_pool().await;
        let owner = user(&db, "olivia").await;
        let other = user(&db, "mallory").await;
        let trips = registry(&db);
        let trip = trips.create(&owner, new_trip("Alps", true)).await.unwrap();

        let changes = TripChanges {
            auto_approve_members: Some(true),
            description: Some("  ski week ".into()),
            ..TripChanges::default()
        };
        assert!(matches!(
            trips.update(&trip.id, &other, changes.clone()).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            trips.update("missing", &owner, changes.clone()).await,
            Err(AppError::NotFound)
        ));

        let updated = trips.update(&trip.id, &owner, changes).await.unwrap();
        assert!(updated.auto_approve_members);
        assert_eq!(updated.name, "Alps");
        assert_eq!(updated.description.as_deref(), Some("ski week"));
        assert_eq!(updated.owner_id, owner);
        assert!(updated.updated_at >= trip.updated_at);
    }

    #[tokio::test]
    async fn discovery_reports_viewer_status() {
        let db = test_pool().await;
        let owner = user(&db, "olivia").await;
        let viewer = user(&db, "vic").await;
        let trips = registry(&db);
        let ledger = MembershipLedger::new(db.clone(), ChangeNotifier::new(16));

        let mine = trips.create(&viewer, new_trip("Mine", true)).await.unwrap();
        let open = trips
            .create(
                &owner,
                NewTrip {
                    auto_approve_members: true,
                    ..new_trip("Open", true)
                },
            )
            .await
            .unwrap();
        let gated = trips.create(&owner, new_trip("Gated", true)).await.unwrap();
        let untouched = trips.create(&owner, new_trip("Other", true)).await.unwrap();
        let hidden = trips.create(&owner, new_trip("Hidden", false)).await.unwrap();

        ledger.request_join(&open.id, &viewer).await.unwrap();
        ledger.request_join(&gated.id, &viewer).await.unwrap();

        let listed = trips.list_discoverable(&viewer).await.unwrap();
        let status_of = |id: &str| {
            listed
                .iter()
                .find(|s| s.trip.id == id)
                .map(|s| s.membership_status)
        };
        assert_eq!(status_of(&mine.id), Some(ViewerStatus::Owner));
        assert_eq!(status_of(&open.id), Some(ViewerStatus::Approved));
        assert_eq!(status_of(&gated.id), Some(ViewerStatus::Pending));
        assert_eq!(status_of(&untouched.id), Some(ViewerStatus::NotMember));
        assert_eq!(status_of(&hidden.id), None);
        for summary in &listed {
            assert_eq!(
                summary.membership_status == ViewerStatus::Owner,
                summary.trip.owner_id == viewer
            );
        }

        let open_summary = listed.iter().find(|s| s.trip.id == open.id).unwrap();
        assert_eq!(open_summary.member_count, 2);
        assert_eq!(open_summary.owner_username, "olivia");

        let owner_view = trips.list_discoverable(&owner).await.unwrap();
        assert!(owner_view.iter().any(|s| s.trip.id == hidden.id));
    }

    #[tokio::test]
    async fn my_trips_excludes_pending() {
        let db = test_pool().await;
        let owner = user(&db, "olivia").await;
        let viewer = user(&db, "vic").await;
        let trips = registry(&db);
        let ledger = MembershipLedger::new(db.clone(), ChangeNotifier::new(16));
        let gated = trips.create(&owner, new_trip("Gated", false)).await.unwrap();

        ledger.request_join(&gated.id, &viewer).await.unwrap();
        assert!(trips.list_for_user(&viewer).await.unwrap().is_empty());
        assert_eq!(trips.list_for_user(&owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn details_need_access_and_show_owner_the_invite_link() {
        let db = test_pool().await;
        let owner = user(&db, "olivia").await;
        let stranger = user(&db, "sam").await;
        let trips = registry(&db);
        let trip = trips.create(&owner, new_trip("Alps", false)).await.unwrap();

        let details = trips.details(&trip.id, &owner).await.unwrap();
        assert_eq!(
            details.invite_link,
            Some(format!("https://trippack.test/join/{}", trip.invite_code))
        );
        assert!(matches!(
            trips.details(&trip.id, &stranger).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            trips.details("missing", &owner).await,
            Err(AppError::NotFound)
        ));
    }
}
