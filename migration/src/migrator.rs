use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202601050001_create_class_sessions::Migration),
            Box::new(migrations::m202601050002_create_attendance_records::Migration),
            Box::new(migrations::m202601050003_create_suspicious_activities::Migration),
            Box::new(migrations::m202601050004_create_face_enrollments::Migration),
        ]
    }
}
