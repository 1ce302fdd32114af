//! CDP IAM client (`/api/v1/iam`).
//!
//! Every `list*` call follows `nextToken` until exhausted. Group
//! reconciliation (`manage_group_*`) applies the minimal set of add/remove
//! calls and reports whether anything changed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{present, CdpClient, Squelch};
use crate::error::CdpResult;

const BASE: &str = "/api/v1/iam";

/// A resource role bound to a resource.
///
/// Accepts both the API's `resourceCrn`/`resourceRoleCrn` keys and the
/// shorter `resource`/`role` keys when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAssignment {
    #[serde(alias = "resource")]
    pub resource_crn: String,
    #[serde(alias = "role")]
    pub resource_role_crn: String,
}

impl ResourceAssignment {
    pub fn new(resource_crn: &str, resource_role_crn: &str) -> Self {
        Self {
            resource_crn: resource_crn.to_string(),
            resource_role_crn: resource_role_crn.to_string(),
        }
    }
}

/// A group with its members and role bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetails {
    pub group_name: String,
    pub crn: Option<String>,
    pub creation_date: Option<String>,
    pub sync_membership_on_user_login: Option<bool>,
    pub members: Vec<String>,
    pub roles: Vec<String>,
    pub resource_assignments: Vec<ResourceAssignment>,
}

/// Machine user CRNs carry a `:machineUser:` segment.
pub fn is_machine_user(crn: &str) -> bool {
    crn.contains(":machineUser:")
}

#[derive(Clone)]
pub struct IamClient {
    client: CdpClient,
}

impl IamClient {
    pub fn new(client: CdpClient) -> Self {
        Self { client }
    }

    async fn list_all(&self, action: &str, body: Value, squelch: &Squelch) -> CdpResult<Value> {
        let resp = self
            .client
            .post_paginated(
                &format!("{}/{}", BASE, action),
                &body,
                &self.client.paginator(),
                squelch,
            )
            .await?;
        Ok(present(resp).unwrap_or_else(|| json!({})))
    }

    async fn call(&self, action: &str, body: Value) -> CdpResult<Option<Value>> {
        self.client
            .post(&format!("{}/{}", BASE, action), Some(&body), &Squelch::none())
            .await
    }

    pub async fn list_groups(&self, group_names: Option<&[String]>) -> CdpResult<Vec<Value>> {
        let body = filter_body("groupNames", group_names);
        let resp = self
            .list_all("listGroups", body, &Squelch::none().on(404, json!({})))
            .await?;
        Ok(items(&resp, "groups"))
    }

    pub async fn list_users(&self, user_ids: Option<&[String]>) -> CdpResult<Vec<Value>> {
        let resp = self
            .list_all("listUsers", filter_body("userIds", user_ids), &Squelch::none())
            .await?;
        Ok(items(&resp, "users"))
    }

    pub async fn list_machine_users(&self, names: Option<&[String]>) -> CdpResult<Vec<Value>> {
        let resp = self
            .list_all(
                "listMachineUsers",
                filter_body("machineUserNames", names),
                &Squelch::none(),
            )
            .await?;
        Ok(items(&resp, "machineUsers"))
    }

    pub async fn list_roles(&self, names: Option<&[String]>) -> CdpResult<Vec<Value>> {
        let resp = self
            .list_all("listRoles", filter_body("roleNames", names), &Squelch::none())
            .await?;
        Ok(items(&resp, "roles"))
    }

    pub async fn list_resource_roles(&self, names: Option<&[String]>) -> CdpResult<Vec<Value>> {
        let resp = self
            .list_all(
                "listResourceRoles",
                filter_body("resourceRoleNames", names),
                &Squelch::none(),
            )
            .await?;
        Ok(items(&resp, "resourceRoles"))
    }

    /// CRNs of the users and machine users in the group.
    pub async fn list_group_members(&self, group_name: &str) -> CdpResult<Vec<String>> {
        let resp = self
            .list_all("listGroupMembers", json!({ "groupName": group_name }), &Squelch::none())
            .await?;
        Ok(strings(&resp, "memberCrns"))
    }

    pub async fn list_group_assigned_roles(&self, group_name: &str) -> CdpResult<Vec<String>> {
        let resp = self
            .list_all(
                "listGroupAssignedRoles",
                json!({ "groupName": group_name }),
                &Squelch::none(),
            )
            .await?;
        Ok(strings(&resp, "roleCrns"))
    }

    pub async fn list_group_assigned_resource_roles(
        &self,
        group_name: &str,
    ) -> CdpResult<Vec<ResourceAssignment>> {
        let resp = self
            .list_all(
                "listGroupAssignedResourceRoles",
                json!({ "groupName": group_name }),
                &Squelch::none(),
            )
            .await?;
        assignments(&resp)
    }

    /// Role CRNs held by a user, or by the caller when `user` is `None`.
    pub async fn list_user_assigned_roles(&self, user: Option<&str>) -> CdpResult<Vec<String>> {
        let resp = self
            .list_all("listUserAssignedRoles", user_body(user), &Squelch::none())
            .await?;
        Ok(strings(&resp, "roleCrns"))
    }

    pub async fn list_user_assigned_resource_roles(
        &self,
        user: Option<&str>,
    ) -> CdpResult<Vec<ResourceAssignment>> {
        let resp = self
            .list_all("listUserAssignedResourceRoles", user_body(user), &Squelch::none())
            .await?;
        assignments(&resp)
    }

    pub async fn list_machine_user_assigned_roles(
        &self,
        machine_user_name: &str,
    ) -> CdpResult<Vec<String>> {
        let resp = self
            .list_all(
                "listMachineUserAssignedRoles",
                json!({ "machineUserName": machine_user_name }),
                &Squelch::none(),
            )
            .await?;
        Ok(strings(&resp, "roleCrns"))
    }

    pub async fn list_machine_user_assigned_resource_roles(
        &self,
        machine_user_name: &str,
    ) -> CdpResult<Vec<ResourceAssignment>> {
        let resp = self
            .list_all(
                "listMachineUserAssignedResourceRoles",
                json!({ "machineUserName": machine_user_name }),
                &Squelch::none(),
            )
            .await?;
        assignments(&resp)
    }

    /// CRNs of the groups a user belongs to.
    pub async fn list_groups_for_user(&self, user_id: &str) -> CdpResult<Vec<String>> {
        let resp = self
            .list_all("listGroupsForUser", json!({ "userId": user_id }), &Squelch::none())
            .await?;
        Ok(strings(&resp, "groupCrns"))
    }

    pub async fn list_groups_for_machine_user(&self, machine_user_name: &str) -> CdpResult<Vec<String>> {
        let resp = self
            .list_all(
                "listGroupsForMachineUser",
                json!({ "machineUserName": machine_user_name }),
                &Squelch::none(),
            )
            .await?;
        Ok(strings(&resp, "groupCrns"))
    }

    /// Users, machine users and groups holding a role on `resource_crn`.
    pub async fn list_resource_assignees(&self, resource_crn: &str) -> CdpResult<Vec<Value>> {
        let resp = self
            .list_all(
                "listResourceAssignees",
                json!({ "resourceCrn": resource_crn }),
                &Squelch::none(),
            )
            .await?;
        Ok(items(&resp, "resourceAssignees"))
    }

    /// The named user, or the caller when `user_id` is `None`.
    pub async fn get_user(&self, user_id: Option<&str>) -> CdpResult<Value> {
        let mut body = json!({});
        if let Some(id) = user_id {
            body["userId"] = json!(id);
        }
        let resp = self.call("getUser", body).await?;
        Ok(resp
            .and_then(|r| present(r.get("user").cloned()))
            .unwrap_or_else(|| json!({})))
    }

    pub async fn create_group(
        &self,
        group_name: &str,
        sync_membership_on_user_login: Option<bool>,
    ) -> CdpResult<Option<Value>> {
        self.call("createGroup", group_body(group_name, sync_membership_on_user_login))
            .await
    }

    pub async fn update_group(
        &self,
        group_name: &str,
        sync_membership_on_user_login: Option<bool>,
    ) -> CdpResult<Option<Value>> {
        self.call("updateGroup", group_body(group_name, sync_membership_on_user_login))
            .await
    }

    pub async fn delete_group(&self, group_name: &str) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/deleteGroup", BASE),
                Some(&json!({ "groupName": group_name })),
                &Squelch::none().on(404, json!({})),
            )
            .await
    }

    pub async fn add_user_to_group(&self, group_name: &str, user_id: &str) -> CdpResult<Option<Value>> {
        self.call("addUserToGroup", json!({ "groupName": group_name, "userId": user_id }))
            .await
    }

    pub async fn remove_user_from_group(
        &self,
        group_name: &str,
        user_id: &str,
    ) -> CdpResult<Option<Value>> {
        self.call("removeUserFromGroup", json!({ "groupName": group_name, "userId": user_id }))
            .await
    }

    pub async fn add_machine_user_to_group(
        &self,
        group_name: &str,
        machine_user_name: &str,
    ) -> CdpResult<Option<Value>> {
        self.call(
            "addMachineUserToGroup",
            json!({ "groupName": group_name, "machineUserName": machine_user_name }),
        )
        .await
    }

    pub async fn remove_machine_user_from_group(
        &self,
        group_name: &str,
        machine_user_name: &str,
    ) -> CdpResult<Option<Value>> {
        self.call(
            "removeMachineUserFromGroup",
            json!({ "groupName": group_name, "machineUserName": machine_user_name }),
        )
        .await
    }

    pub async fn assign_group_role(&self, group_name: &str, role: &str) -> CdpResult<Option<Value>> {
        self.call("assignGroupRole", json!({ "groupName": group_name, "role": role }))
            .await
    }

    pub async fn unassign_group_role(&self, group_name: &str, role: &str) -> CdpResult<Option<Value>> {
        self.call("unassignGroupRole", json!({ "groupName": group_name, "role": role }))
            .await
    }

    pub async fn assign_group_resource_role(
        &self,
        group_name: &str,
        assignment: &ResourceAssignment,
    ) -> CdpResult<Option<Value>> {
        self.call(
            "assignGroupResourceRole",
            resource_role_body(group_name, assignment),
        )
        .await
    }

    pub async fn unassign_group_resource_role(
        &self,
        group_name: &str,
        assignment: &ResourceAssignment,
    ) -> CdpResult<Option<Value>> {
        self.call(
            "unassignGroupResourceRole",
            resource_role_body(group_name, assignment),
        )
        .await
    }

    /// Assemble a group with its members and role bindings, or `None` if
    /// no such group exists.
    pub async fn get_group_details(&self, group_name: &str) -> CdpResult<Option<GroupDetails>> {
        let groups = self.list_groups(Some(&[group_name.to_string()])).await?;
        let Some(group) = groups.into_iter().next() else {
            return Ok(None);
        };

        let members = self.list_group_members(group_name).await?;
        let roles = self.list_group_assigned_roles(group_name).await?;
        let resource_assignments = self.list_group_assigned_resource_roles(group_name).await?;

        Ok(Some(GroupDetails {
            group_name: group
                .get("groupName")
                .and_then(Value::as_str)
                .unwrap_or(group_name)
                .to_string(),
            crn: str_field(&group, "crn"),
            creation_date: str_field(&group, "creationDate"),
            sync_membership_on_user_login: group
                .get("syncMembershipOnUserLogin")
                .and_then(Value::as_bool),
            members,
            roles,
            resource_assignments,
        }))
    }

    /// Bring group membership to `desired`. Members missing from `desired`
    /// are removed only when `purge` is set.
    pub async fn manage_group_users(
        &self,
        group_name: &str,
        current: &[String],
        desired: &[String],
        purge: bool,
    ) -> CdpResult<bool> {
        let mut changed = false;

        if purge {
            for crn in current.iter().filter(|c| !desired.contains(c)) {
                log::debug!("Removing {} from group {}", crn, group_name);
                if is_machine_user(crn) {
                    self.remove_machine_user_from_group(group_name, crn).await?;
                } else {
                    self.remove_user_from_group(group_name, crn).await?;
                }
                changed = true;
            }
        }

        for crn in desired.iter().filter(|d| !current.contains(d)) {
            log::debug!("Adding {} to group {}", crn, group_name);
            if is_machine_user(crn) {
                self.add_machine_user_to_group(group_name, crn).await?;
            } else {
                self.add_user_to_group(group_name, crn).await?;
            }
            changed = true;
        }

        Ok(changed)
    }

    pub async fn manage_group_roles(
        &self,
        group_name: &str,
        current: &[String],
        desired: &[String],
        purge: bool,
    ) -> CdpResult<bool> {
        let mut changed = false;

        if purge {
            for role in current.iter().filter(|r| !desired.contains(r)) {
                self.unassign_group_role(group_name, role).await?;
                changed = true;
            }
        }

        for role in desired.iter().filter(|r| !current.contains(r)) {
            self.assign_group_role(group_name, role).await?;
            changed = true;
        }

        Ok(changed)
    }

    pub async fn manage_group_resource_roles(
        &self,
        group_name: &str,
        current: &[ResourceAssignment],
        desired: &[ResourceAssignment],
        purge: bool,
    ) -> CdpResult<bool> {
        let mut changed = false;

        if purge {
            for assignment in current.iter().filter(|a| !desired.contains(a)) {
                self.unassign_group_resource_role(group_name, assignment).await?;
                changed = true;
            }
        }

        for assignment in desired.iter().filter(|a| !current.contains(a)) {
            self.assign_group_resource_role(group_name, assignment).await?;
            changed = true;
        }

        Ok(changed)
    }
}

fn filter_body(key: &str, values: Option<&[String]>) -> Value {
    let mut body = json!({});
    if let Some(values) = values {
        body[key] = json!(values);
    }
    body
}

fn user_body(user: Option<&str>) -> Value {
    let mut body = json!({});
    if let Some(user) = user {
        body["user"] = json!(user);
    }
    body
}

fn assignments(resp: &Value) -> CdpResult<Vec<ResourceAssignment>> {
    let assignments = resp
        .get("resourceAssignments")
        .cloned()
        .unwrap_or_else(|| json!([]));
    Ok(serde_json::from_value(assignments)?)
}

fn group_body(group_name: &str, sync_membership_on_user_login: Option<bool>) -> Value {
    let mut body = json!({ "groupName": group_name });
    if let Some(sync) = sync_membership_on_user_login {
        body["syncMembershipOnUserLogin"] = json!(sync);
    }
    body
}

fn resource_role_body(group_name: &str, assignment: &ResourceAssignment) -> Value {
    json!({
        "groupName": group_name,
        "resourceCrn": assignment.resource_crn,
        "resourceRoleCrn": assignment.resource_role_crn,
    })
}

fn items(resp: &Value, key: &str) -> Vec<Value> {
    resp.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn strings(resp: &Value, key: &str) -> Vec<String> {
    resp.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}
