//! Nodes, equipment, users and role assignments.

use super::{
    bool_to_int, get_bool, get_enum, get_opt_uuid, get_uuid, map_insert_error, opt_uuid_text,
    RepoError, RepoResult,
};
use crate::model::directory::{Equipment, EquipmentId, Node, NodeId, Role, User, UserId, UserRole};
use rusqlite::{params, Connection, Row};

const NODE_SELECT_SQL: &str =
    "SELECT id, code, name, location, acknowledgment_text, is_active FROM nodes";
const EQUIPMENT_SELECT_SQL: &str = "SELECT id, node_id, name, category, is_active FROM equipment";
const USER_SELECT_SQL: &str = "SELECT u.id, u.email, u.full_name, u.organization FROM users u";

/// Active evaluator with their specialization area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorCandidate {
    pub user: User,
    pub area: Option<String>,
}

pub struct SqliteDirectoryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDirectoryRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn create_node(&self, node: &Node) -> RepoResult<NodeId> {
        self.conn
            .execute(
                "INSERT INTO nodes (id, code, name, location, acknowledgment_text, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    node.id.to_string(),
                    node.code.as_str(),
                    node.name.as_str(),
                    node.location.as_str(),
                    node.acknowledgment_text.as_str(),
                    bool_to_int(node.is_active),
                ],
            )
            .map_err(|err| map_insert_error(err, || format!("node code `{}`", node.code)))?;
        Ok(node.id)
    }

    pub fn get_node(&self, id: NodeId) -> RepoResult<Option<Node>> {
        self.query_node(&format!("{NODE_SELECT_SQL} WHERE id = ?1;"), &id.to_string())
    }

    pub fn get_node_by_code(&self, code: &str) -> RepoResult<Option<Node>> {
        self.query_node(&format!("{NODE_SELECT_SQL} WHERE code = ?1;"), code)
    }

    fn query_node(&self, sql: &str, key: &str) -> RepoResult<Option<Node>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_node_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn require_node(&self, id: NodeId) -> RepoResult<Node> {
        self.get_node(id)?
            .ok_or_else(|| RepoError::not_found("node", id))
    }

    pub fn list_nodes(&self) -> RepoResult<Vec<Node>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{NODE_SELECT_SQL} ORDER BY code ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next()? {
            nodes.push(parse_node_row(row)?);
        }
        Ok(nodes)
    }

    pub fn create_equipment(&self, equipment: &Equipment) -> RepoResult<EquipmentId> {
        self.conn.execute(
            "INSERT INTO equipment (id, node_id, name, category, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                equipment.id.to_string(),
                equipment.node_id.to_string(),
                equipment.name.as_str(),
                equipment.category.as_str(),
                bool_to_int(equipment.is_active),
            ],
        )?;
        Ok(equipment.id)
    }

    pub fn get_equipment(&self, id: EquipmentId) -> RepoResult<Option<Equipment>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{EQUIPMENT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_equipment_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_equipment_for_node(&self, node_id: NodeId) -> RepoResult<Vec<Equipment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EQUIPMENT_SELECT_SQL} WHERE node_id = ?1 ORDER BY name ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([node_id.to_string()])?;
        let mut equipment = Vec::new();
        while let Some(row) = rows.next()? {
            equipment.push(parse_equipment_row(row)?);
        }
        Ok(equipment)
    }

    pub fn create_user(&self, user: &User) -> RepoResult<UserId> {
        self.conn
            .execute(
                "INSERT INTO users (id, email, full_name, organization)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    user.id.to_string(),
                    user.email.as_str(),
                    user.full_name.as_str(),
                    user.organization.as_deref(),
                ],
            )
            .map_err(|err| map_insert_error(err, || format!("user email `{}`", user.email)))?;
        Ok(user.id)
    }

    pub fn get_user(&self, id: UserId) -> RepoResult<Option<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{USER_SELECT_SQL} WHERE u.id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_user_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn require_user(&self, id: UserId) -> RepoResult<User> {
        self.get_user(id)?
            .ok_or_else(|| RepoError::not_found("user", id))
    }

    pub fn list_users(&self) -> RepoResult<Vec<User>> {
        self.query_users(&format!("{USER_SELECT_SQL} ORDER BY u.email ASC;"), &[])
    }

    pub fn assign_role(&self, role: &UserRole) -> RepoResult<()> {
        self.conn
            .execute(
                "INSERT INTO user_roles (id, user_id, role, node_id, area, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    role.id.to_string(),
                    role.user_id.to_string(),
                    role.role.as_str(),
                    opt_uuid_text(role.node_id),
                    role.area.as_deref(),
                    bool_to_int(role.is_active),
                ],
            )
            .map_err(|err| {
                map_insert_error(err, || {
                    format!("role `{}` for user {}", role.role.as_str(), role.user_id)
                })
            })?;
        Ok(())
    }

    pub fn set_role_active(&self, role_id: uuid::Uuid, is_active: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE user_roles SET is_active = ?1 WHERE id = ?2;",
            params![bool_to_int(is_active), role_id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("user role", role_id));
        }
        Ok(())
    }

    pub fn roles_for_user(&self, user_id: UserId) -> RepoResult<Vec<UserRole>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, role, node_id, area, is_active
             FROM user_roles WHERE user_id = ?1 ORDER BY assigned_at ASC, id ASC;",
        )?;
        let mut rows = stmt.query([user_id.to_string()])?;
        let mut roles = Vec::new();
        while let Some(row) = rows.next()? {
            roles.push(UserRole {
                id: get_uuid(row, "id")?,
                user_id: get_uuid(row, "user_id")?,
                role: get_enum(row, "role", Role::parse)?,
                node_id: get_opt_uuid(row, "node_id")?,
                area: row.get("area")?,
                is_active: get_bool(row, "is_active")?,
            });
        }
        Ok(roles)
    }

    pub fn has_active_role(&self, user_id: UserId, role: Role) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM user_roles
                WHERE user_id = ?1 AND role = ?2 AND is_active = 1
            );",
            params![user_id.to_string(), role.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    pub fn is_active_node_coordinator(&self, user_id: UserId, node_id: NodeId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM user_roles
                WHERE user_id = ?1 AND role = 'node_coordinator'
                  AND node_id = ?2 AND is_active = 1
            );",
            params![user_id.to_string(), node_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    /// Active coordinators of one node.
    pub fn node_coordinators(&self, node_id: NodeId) -> RepoResult<Vec<User>> {
        self.query_users(
            &format!(
                "{USER_SELECT_SQL}
                 JOIN user_roles r ON r.user_id = u.id
                 WHERE r.role = 'node_coordinator' AND r.node_id = ?1 AND r.is_active = 1
                 ORDER BY u.email ASC;"
            ),
            &[node_id.to_string()],
        )
    }

    /// Active network-wide call coordinators.
    pub fn active_coordinators(&self) -> RepoResult<Vec<User>> {
        self.query_users(
            &format!(
                "{USER_SELECT_SQL}
                 WHERE u.id IN (
                    SELECT user_id FROM user_roles WHERE role = 'coordinator' AND is_active = 1
                 )
                 ORDER BY u.email ASC;"
            ),
            &[],
        )
    }

    pub fn active_evaluators(&self) -> RepoResult<Vec<EvaluatorCandidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.email, u.full_name, u.organization, MAX(r.area) AS area
             FROM users u
             JOIN user_roles r ON r.user_id = u.id
             WHERE r.role = 'evaluator' AND r.is_active = 1
             GROUP BY u.id
             ORDER BY u.email ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut evaluators = Vec::new();
        while let Some(row) = rows.next()? {
            evaluators.push(EvaluatorCandidate {
                user: parse_user_row(row)?,
                area: row.get("area")?,
            });
        }
        Ok(evaluators)
    }

    fn query_users(&self, sql: &str, args: &[String]) -> RepoResult<Vec<User>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(parse_user_row(row)?);
        }
        Ok(users)
    }
}

fn parse_node_row(row: &Row<'_>) -> RepoResult<Node> {
    Ok(Node {
        id: get_uuid(row, "id")?,
        code: row.get("code")?,
        name: row.get("name")?,
        location: row.get("location")?,
        acknowledgment_text: row.get("acknowledgment_text")?,
        is_active: get_bool(row, "is_active")?,
    })
}

fn parse_equipment_row(row: &Row<'_>) -> RepoResult<Equipment> {
    Ok(Equipment {
        id: get_uuid(row, "id")?,
        node_id: get_uuid(row, "node_id")?,
        name: row.get("name")?,
        category: row.get("category")?,
        is_active: get_bool(row, "is_active")?,
    })
}

fn parse_user_row(row: &Row<'_>) -> RepoResult<User> {
    Ok(User {
        id: get_uuid(row, "id")?,
        email: row.get("email")?,
        full_name: row.get("full_name")?,
        organization: row.get("organization")?,
    })
}
