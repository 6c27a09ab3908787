#[derive(Debug)]
pub struct ApiUrls;

impl ApiUrls {
    pub const HEALTH: &'static str = "/health";

    // Ambassador profiles
    pub const AMBASSADORS: &'static str = "/api/ambassadors";
    pub const PROFILE_BY_ID: &'static str = "/api/profiles/:id";

    // Bookings
    pub const BOOKINGS: &'static str = "/api/bookings";
    pub const BOOKING_BY_ID: &'static str = "/api/bookings/:id";
    pub const BOOKING_STATUS: &'static str = "/api/bookings/:id/status";

    // Reviews
    pub const REVIEWS: &'static str = "/api/reviews";
    pub const AMBASSADOR_REVIEWS: &'static str = "/api/ambassadors/:id/reviews";

    // Users
    pub const USER_DASHBOARD: &'static str = "/api/users/:id/dashboard";

    // Admin
    pub const ADMIN_RECONCILE: &'static str = "/api/admin/reconcile";
}
