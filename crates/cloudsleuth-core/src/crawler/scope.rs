//! Planning which namespaces a run covers.

use tracing::{debug, info};

use super::ownership::OwnerIdentity;
use super::pages::Pages;
use crate::error::CrawlError;
use crate::model::{Classification, Container, ContainerId, ContainerKind, ListingRoot};
use crate::remote::{Cursor, Member, Namespace, NamespaceKind, Session};

/// What a run walks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    /// The authenticated account's own space, from `path`.
    Account { path: String },
    /// One member's personal space, found by name or email.
    Member { identity: String, path: String },
    /// One team folder, found by name.
    TeamFolder { name: String, path: String },
    /// A synthetic tenant root over the selected namespace families.
    Tenant {
        members: bool,
        team: bool,
        other: bool,
    },
}

/// Per-namespace walk constraints.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalkContext {
    /// Restrict shared content to entries this identity owns.
    pub verify_owner: Option<OwnerIdentity>,
}

/// A namespace root under the tenant root.
#[derive(Clone, Debug)]
pub struct PlannedRoot {
    pub container: Container,
    pub context: WalkContext,
}

/// The walk root plus, for tenant scopes, the namespace roots below it.
#[derive(Clone, Debug)]
pub struct Plan {
    pub root: Container,
    pub context: WalkContext,
    pub namespaces: Vec<PlannedRoot>,
}

impl Plan {
    pub fn is_tenant(&self) -> bool {
        self.root.kind == ContainerKind::TenantRoot
    }
}

/// Every member of the tenant, across all pages.
pub fn all_members(session: &Session) -> Result<Vec<Member>, CrawlError> {
    let mut members = Vec::new();
    let pages = Pages::new(|cursor: Option<&Cursor>| {
        session.call("list members", |s| s.list_members(cursor))
    });
    for page in pages {
        members.extend(page?);
    }
    Ok(members)
}

/// Every namespace of the tenant, across all pages.
pub fn all_namespaces(session: &Session) -> Result<Vec<Namespace>, CrawlError> {
    let mut namespaces = Vec::new();
    let pages = Pages::new(|cursor: Option<&Cursor>| {
        session.call("list namespaces", |s| s.list_namespaces(cursor))
    });
    for page in pages {
        namespaces.extend(page?);
    }
    Ok(namespaces)
}

/// The listing path keeps the spelling the operator typed.
fn at_path(mut root: Container) -> Container {
    if root.path_display != "/" {
        root.path_lower = root.path_display.clone();
    }
    root
}

fn member_root(member: &Member, id: ContainerId, path: &str) -> Container {
    let mut root = Container::new(
        id,
        ContainerKind::NamespaceRoot,
        path,
        ListingRoot::Member(member.id.clone()),
        member.email.as_str(),
        Classification::Private,
    );
    root.owner = Some(member.email.clone());
    at_path(root)
}

fn namespace_root(ns: &Namespace, id: ContainerId, path: &str, class: Classification) -> Container {
    at_path(Container::new(
        id,
        ContainerKind::NamespaceRoot,
        path,
        ListingRoot::Namespace(ns.id.clone()),
        ns.name.as_str(),
        class,
    ))
}

/// Resolve `scope` against the tenant.
pub fn plan(session: &Session, scope: &Scope) -> Result<Plan, CrawlError> {
    match scope {
        Scope::Account { path } => Ok(Plan {
            root: at_path(Container::new(
                ContainerId::root(),
                ContainerKind::NamespaceRoot,
                path.as_str(),
                ListingRoot::Home,
                "",
                Classification::Private,
            )),
            context: WalkContext::default(),
            namespaces: Vec::new(),
        }),

        Scope::Member { identity, path } => {
            let member = all_members(session)?
                .into_iter()
                .find(|m| m.matches(identity))
                .ok_or_else(|| CrawlError::UnknownMember {
                    identity: identity.clone(),
                })?;
            info!("Walking personal space of {} ({})", member.name, member.email);
            Ok(Plan {
                root: member_root(&member, ContainerId::root(), path),
                context: WalkContext {
                    verify_owner: Some(OwnerIdentity::email(member.email.clone())),
                },
                namespaces: Vec::new(),
            })
        }

        Scope::TeamFolder { name, path } => {
            let ns = all_namespaces(session)?
                .into_iter()
                .find(|ns| ns.kind == NamespaceKind::TeamFolder && ns.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| CrawlError::UnknownTeamFolder { name: name.clone() })?;
            info!("Walking team folder {} (namespace {})", ns.name, ns.id);
            Ok(Plan {
                root: namespace_root(&ns, ContainerId::root(), path, Classification::TeamOwned),
                context: WalkContext::default(),
                namespaces: Vec::new(),
            })
        }

        Scope::Tenant {
            members,
            team,
            other,
        } => {
            let mut namespaces = Vec::new();
            if *members {
                for member in all_members(session)? {
                    namespaces.push(PlannedRoot {
                        container: member_root(&member, ContainerId::member(&member.id), "/"),
                        context: WalkContext {
                            verify_owner: Some(OwnerIdentity::email(member.email.clone())),
                        },
                    });
                }
            }
            if *team || *other {
                for ns in all_namespaces(session)? {
                    let class = match ns.kind {
                        NamespaceKind::TeamFolder if *team => Classification::TeamOwned,
                        NamespaceKind::SharedFolder if *other => Classification::Other,
                        NamespaceKind::AppFolder if *other => Classification::Sandboxed,
                        _ => {
                            debug!("Not planning namespace {} ({:?})", ns.name, ns.kind);
                            continue;
                        }
                    };
                    namespaces.push(PlannedRoot {
                        container: namespace_root(&ns, ContainerId::namespace(&ns.id), "/", class),
                        context: WalkContext::default(),
                    });
                }
            }
            info!("Planned {} namespace roots", namespaces.len());
            Ok(Plan {
                root: Container::new(
                    ContainerId::root(),
                    ContainerKind::TenantRoot,
                    "/",
                    ListingRoot::Home,
                    "",
                    Classification::Other,
                ),
                context: WalkContext::default(),
                namespaces,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use std::sync::Arc;

    fn session() -> Session {
        let mut b = MemoryStore::builder().page_size(1);
        for (id, email, name) in [
            ("dbmid:1", "alice@x.com", "Alice"),
            ("dbmid:2", "bob@x.com", "Bob"),
        ] {
            b = b.member(Member {
                id: id.into(),
                email: email.into(),
                name: name.into(),
            });
        }
        for (id, name, kind) in [
            ("10", "Engineering", NamespaceKind::TeamFolder),
            ("11", "Vendor Drop", NamespaceKind::SharedFolder),
            ("12", "Apps/Zapier", NamespaceKind::AppFolder),
            ("13", "alice home", NamespaceKind::TeamMemberFolder),
        ] {
            b = b.namespace(Namespace {
                id: id.into(),
                name: name.into(),
                kind,
                team_member_id: None,
            });
        }
        Session::without_refresh(Arc::new(b.build()))
    }

    #[test]
    fn member_scope_resolves_across_pages_and_verifies_owner() {
        let plan = plan(
            &session(),
            &Scope::Member {
                identity: "BOB".into(),
                path: "/".into(),
            },
        )
        .unwrap();
        assert_eq!(plan.root.id.as_str(), "root");
        assert_eq!(plan.root.root, ListingRoot::Member("dbmid:2".into()));
        assert_eq!(plan.root.namespace, "bob@x.com");
        assert_eq!(
            plan.context.verify_owner,
            Some(OwnerIdentity::email("bob@x.com"))
        );
        assert!(!plan.is_tenant());
    }

    #[test]
    fn account_scope_keeps_path_spelling() {
        let plan = plan(
            &session(),
            &Scope::Account {
                path: "/Projects/Q3".into(),
            },
        )
        .unwrap();
        assert_eq!(plan.root.path_lower, "/Projects/Q3");
        assert_eq!(plan.root.name, "Q3");
        assert_eq!(plan.root.root, ListingRoot::Home);
    }

    #[test]
    fn unknown_member_and_team_folder_are_errors() {
        let s = session();
        assert!(matches!(
            plan(
                &s,
                &Scope::Member {
                    identity: "carol".into(),
                    path: "/".into()
                }
            ),
            Err(CrawlError::UnknownMember { .. })
        ));
        assert!(matches!(
            plan(
                &s,
                &Scope::TeamFolder {
                    name: "Vendor Drop".into(),
                    path: "/".into()
                }
            ),
            Err(CrawlError::UnknownTeamFolder { .. })
        ));
    }

    #[test]
    fn tenant_scope_plans_selected_families() {
        let plan = plan(
            &session(),
            &Scope::Tenant {
                members: true,
                team: true,
                other: true,
            },
        )
        .unwrap();
        assert!(plan.is_tenant());
        let planned: Vec<(&str, Classification)> = plan
            .namespaces
            .iter()
            .map(|p| (p.container.id.as_str(), p.container.classification))
            .collect();
        assert_eq!(
            planned,
            vec![
                ("member:dbmid:1", Classification::Private),
                ("member:dbmid:2", Classification::Private),
                ("namespace:10", Classification::TeamOwned),
                ("namespace:11", Classification::Other),
                ("namespace:12", Classification::Sandboxed),
            ]
        );
        assert!(plan.namespaces[0].context.verify_owner.is_some());
        assert!(plan.namespaces[2].context.verify_owner.is_none());
    }

    #[test]
    fn tenant_scope_can_exclude_families() {
        let plan = plan(
            &session(),
            &Scope::Tenant {
                members: false,
                team: true,
                other: false,
            },
        )
        .unwrap();
        assert_eq!(plan.namespaces.len(), 1);
        assert_eq!(plan.namespaces[0].container.namespace, "Engineering");
    }
}
