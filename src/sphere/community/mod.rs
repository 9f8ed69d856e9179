//! Communities: membership, visibility and join requests

pub mod models;
pub mod service;

pub use models::{
    search_and_sort, Community, CommunityMember, CommunitySort, JoinOutcome, JoinRequest,
    MemberRole, NewCommunity, RequestStatus, Visibility, COMMUNITIES, JOIN_REQUESTS, MEMBERS,
};
pub use service::CommunityService;
