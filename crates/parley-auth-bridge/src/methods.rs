use crate::rate_gate::EndpointClass;

/// An upstream Web API method with its rate tier and scoping rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiMethod {
    pub name: &'static str,
    pub class: EndpointClass,
    /// Must target a single team; ambiguous under a multi-team identity.
    pub team_scoped: bool,
}

impl ApiMethod {
    pub const AUTH_TEST: ApiMethod = ApiMethod::read("auth.test", EndpointClass::Unpaced);
    pub const AUTH_TEAMS_LIST: ApiMethod = ApiMethod::read("auth.teams.list", EndpointClass::Tier2);
    pub const TEAM_INFO: ApiMethod = ApiMethod {
        name: "team.info",
        class: EndpointClass::Tier3,
        team_scoped: true,
    };
    pub const USERS_LIST: ApiMethod = ApiMethod::read("users.list", EndpointClass::Tier2);
    pub const CONVERSATIONS_LIST: ApiMethod =
        ApiMethod::read("conversations.list", EndpointClass::Tier2);
    pub const EMOJI_LIST: ApiMethod = ApiMethod::read("emoji.list", EndpointClass::Tier2);
    pub const CONVERSATIONS_HISTORY: ApiMethod =
        ApiMethod::read("conversations.history", EndpointClass::Tier3);
    pub const CONVERSATIONS_REPLIES: ApiMethod =
        ApiMethod::read("conversations.replies", EndpointClass::Tier3);
    pub const SEARCH_MESSAGES: ApiMethod = ApiMethod::read("search.messages", EndpointClass::Tier2);

    const fn read(name: &'static str, class: EndpointClass) -> Self {
        ApiMethod {
            name,
            class,
            team_scoped: false,
        }
    }
}
