use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DatabaseConnection, Set};

/// The reference image currently bound to a student identity. Rebinding
/// overwrites the row; the history of which reference each attempt was
/// verified against lives on the attendance records themselves.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "face_enrollments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub student_id: i64,
    pub reference_url: String,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Binds (or rebinds) a reference image to the student.
    pub async fn bind(
        db: &DatabaseConnection,
        student_id: i64,
        reference_url: &str,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        match Entity::find_by_id(student_id).one(db).await? {
            Some(existing) => {
                let mut active: ActiveModel = existing.into();
                active.reference_url = Set(reference_url.to_owned());
                active.updated_at = Set(now);
                active.update(db).await
            }
            None => {
                ActiveModel {
                    student_id: Set(student_id),
                    reference_url: Set(reference_url.to_owned()),
                    enrolled_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(db)
                .await
            }
        }
    }

    pub async fn for_student(
        db: &DatabaseConnection,
        student_id: i64,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(student_id).one(db).await
    }
}
