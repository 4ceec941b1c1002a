use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = languages)]
#[diesel(primary_key(code))]
pub struct Language {
    pub code: String,
    pub name: String,
    pub native_name: String,
    pub script: String,
    pub direction: String,
    pub speakers: i64,
    pub region: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = annotators)]
#[diesel(belongs_to(User))]
pub struct Annotator {
    pub id: Uuid,
    pub user_id: Uuid,
    pub country: String,
    pub languages: Vec<String>,
    pub status: String,
    pub stripe_account_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = annotators)]
pub struct NewAnnotator {
    pub id: Uuid,
    pub user_id: Uuid,
    pub country: String,
    pub languages: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub description: String,
    pub language_code: String,
    pub annotation_type: String,
    pub instructions: String,
    pub label_config: Option<serde_json::Value>,
    pub price_per_task: f64,
    pub status: String,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub label_studio_project_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub description: String,
    pub language_code: String,
    pub annotation_type: String,
    pub instructions: String,
    pub label_config: Option<serde_json::Value>,
    pub price_per_task: f64,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = tasks)]
#[diesel(belongs_to(Project))]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub data: serde_json::Value,
    pub status: String,
    pub assigned_to: Option<Uuid>,
    pub assigned_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub time_spent: Option<i32>,
    pub result: Option<serde_json::Value>,
    pub label_studio_task_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask {
    pub id: Uuid,
    pub project_id: Uuid,
    pub data: serde_json::Value,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = withdrawals)]
#[diesel(belongs_to(Annotator))]
pub struct Withdrawal {
    pub id: Uuid,
    pub annotator_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub stripe_transfer_id: Option<String>,
    pub stripe_payout_id: Option<String>,
    pub idempotency_key: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = withdrawals)]
pub struct NewWithdrawal {
    pub id: Uuid,
    pub annotator_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub idempotency_key: String,
}
