use crate::ipc::helpers::{
    db_query_err, db_update_err, get_optional_str, get_required_str, get_required_text,
    is_unique_violation, load_user, now_stamp, user_from_row, with_db, without_db, HandlerErr,
    USER_COLUMNS,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Role, ROLE_TABLE};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

fn parse_role(raw: &str) -> Result<Role, HandlerErr> {
    Role::parse(raw).ok_or_else(|| {
        HandlerErr::new("invalid_role", format!("unknown role: {}", raw))
            .with_details(json!({ "role": raw }))
    })
}

fn roles_list(_params: &Value) -> Result<Value, HandlerErr> {
    let roles: Vec<Value> = ROLE_TABLE
        .iter()
        .map(|r| {
            json!({
                "role": r.code,
                "label": r.label,
                "dashboard": r.dashboard,
            })
        })
        .collect();
    Ok(json!({ "roles": roles }))
}

fn users_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let username = get_required_text(params, "username")?;
    let first_name = get_required_text(params, "firstName")?;
    let last_name = get_required_text(params, "lastName")?;
    let role = parse_role(&get_required_str(params, "role")?)?;
    let phone = get_optional_str(params, "phone")?;
    let address = get_optional_str(params, "address")?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, first_name, last_name, role, phone, address, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &username,
            &first_name,
            &last_name,
            role.as_str(),
            &phone,
            &address,
            now_stamp(),
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new("duplicate_username", "username already taken")
                .with_details(json!({ "username": username }))
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "users" }))
        }
    })?;
    info!(user = %id, role = role.as_str(), "user created");
    Ok(json!({ "userId": id }))
}

fn users_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let role = match get_optional_str(params, "role")? {
        Some(raw) => Some(parse_role(&raw)?),
        None => None,
    };
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM users
             WHERE (?1 IS NULL OR role = ?1)
             ORDER BY last_name, first_name",
            USER_COLUMNS
        ))
        .map_err(db_query_err)?;
    let users = stmt
        .query_map([role.map(|r| r.as_str())], user_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;
    let users_json: Vec<Value> = users.iter().map(|u| u.to_json()).collect();
    Ok(json!({ "users": users_json }))
}

fn users_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    Ok(load_user(conn, &user_id)?.to_json())
}

fn users_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let mut user = load_user(conn, &user_id)?;
    if params.get("firstName").is_some() {
        user.first_name = get_required_text(params, "firstName")?;
    }
    if params.get("lastName").is_some() {
        user.last_name = get_required_text(params, "lastName")?;
    }
    if params.get("phone").is_some() {
        user.phone = get_optional_str(params, "phone")?;
    }
    if params.get("address").is_some() {
        user.address = get_optional_str(params, "address")?;
    }
    conn.execute(
        "UPDATE users SET first_name = ?, last_name = ?, phone = ?, address = ? WHERE id = ?",
        (
            &user.first_name,
            &user.last_name,
            &user.phone,
            &user.address,
            &user.id,
        ),
    )
    .map_err(db_update_err("users"))?;
    Ok(user.to_json())
}

fn users_dashboard(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let user = load_user(conn, &user_id)?;
    Ok(json!({
        "userId": user.id,
        "role": user.role.as_str(),
        "dashboard": user.role.dashboard(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roles.list" => Some(without_db(req, roles_list)),
        "users.create" => Some(with_db(state, req, users_create)),
        "users.list" => Some(with_db(state, req, users_list)),
        "users.get" => Some(with_db(state, req, users_get)),
        "users.update" => Some(with_db(state, req, users_update)),
        "users.dashboard" => Some(with_db(state, req, users_dashboard)),
        _ => None,
    }
}
