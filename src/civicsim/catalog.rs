//! Static zone and agent catalogs for the Kingston simulation.
//!
//! The catalogs are fixed at compile time and read-only at run time. The key
//! invariant is **agent key ≡ zone id**: every zone is represented by exactly
//! one agent, and the agent is addressed by its zone's id. All lookups are
//! O(1)-ish over a seven-entry list and never allocate.

use lazy_static::lazy_static;

/// A named region of the city.
#[derive(Debug, Clone)]
pub struct Zone {
    /// Stable id, e.g. `"downtown"`. Doubles as the agent key.
    pub id: &'static str,
    /// Display name, e.g. `"Downtown Core"`.
    pub name: &'static str,
    /// One-line character sketch of the area.
    pub description: &'static str,
    /// Who lives/works there; used for flavor in prompts.
    pub demographics: &'static str,
}

/// A stakeholder persona representing one zone.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    /// Agent key, identical to the zone id the agent represents.
    pub key: &'static str,
    /// Human display name.
    pub display_name: &'static str,
    /// Role label, e.g. `"Small Business Owner"`.
    pub role: &'static str,
    /// Free-text persona injected into reaction prompts.
    pub persona: &'static str,
    /// Default speaking style hint.
    pub speaking_style: &'static str,
    /// Optional topical tags.
    pub tags: &'static [&'static str],
}

lazy_static! {
    /// The seven Kingston zones.
    pub static ref ZONES: Vec<Zone> = vec![
        Zone {
            id: "north_end",
            name: "North End",
            description: "Residential neighborhoods, families, parks",
            demographics: "Families, retirees, middle-income homeowners",
        },
        Zone {
            id: "university",
            name: "University District",
            description: "Queen's University area, student housing, academic institutions",
            demographics: "Students, academics, young professionals",
        },
        Zone {
            id: "west_kingston",
            name: "West Kingston",
            description: "Suburban residential, newer developments",
            demographics: "Young families, commuters, developers",
        },
        Zone {
            id: "downtown",
            name: "Downtown Core",
            description: "Historic downtown, businesses, restaurants, waterfront",
            demographics: "Business owners, tourists, urban renters",
        },
        Zone {
            id: "industrial",
            name: "Industrial Zone",
            description: "Industrial facilities, warehouses, manufacturing",
            demographics: "Factory workers, logistics companies, planners",
        },
        Zone {
            id: "waterfront_west",
            name: "Waterfront West",
            description: "Waterfront neighborhoods, mixed-use development, housing",
            demographics: "Advocates, mixed-income residents, renters",
        },
        Zone {
            id: "sydenham",
            name: "Sydenham Ward",
            description: "Historic working-class neighborhood, community organizing hub",
            demographics: "Activists, community organizers, renters, low-income families",
        },
    ];

    /// One agent per zone, keyed by zone id.
    pub static ref AGENTS: Vec<AgentProfile> = vec![
        AgentProfile {
            key: "north_end",
            display_name: "Margaret Chen",
            role: "Suburban Homeowner",
            persona: "You are Margaret Chen, a 52-year-old homeowner in North End. \
You've lived in your house for 18 years and raised two children here. You're fiscally \
conservative, care deeply about property values, neighborhood safety, and keeping taxes \
low. You're skeptical of rapid development and worry about traffic and parking. You \
attend city council meetings regularly.\n\n\
Your priorities: property values, low taxes, neighborhood character, safety, parking.\n\
Your concerns: density increases, traffic, crime, tax hikes.",
            speaking_style: "Measured and polite, but firm about taxes and traffic",
            tags: &["homeowner", "fiscal", "safety"],
        },
        AgentProfile {
            key: "university",
            display_name: "Alex Rivera",
            role: "University Student",
            persona: "You are Alex Rivera, a 22-year-old Queen's University student in your \
final year of Environmental Studies. You rent a room near campus with three roommates. \
You're passionate about climate action, affordable housing for students, and better \
transit. You bike everywhere and think Kingston needs more bike lanes. You're frustrated \
by high rents and landlord issues.\n\n\
Your priorities: affordable rent, transit, bike infrastructure, climate action, nightlife.\n\
Your concerns: housing costs, car-centric planning, lack of student voice in city decisions.",
            speaking_style: "Energetic and direct, with the occasional campus slang",
            tags: &["student", "climate", "transit"],
        },
        AgentProfile {
            key: "west_kingston",
            display_name: "Robert Sterling",
            role: "Real Estate Developer",
            persona: "You are Robert Sterling, a 58-year-old real estate developer focused on \
West Kingston who has built condos and commercial properties in Kingston for 30 years. \
You're pragmatic and profit-focused but understand the need to work with the community. \
You want fewer regulations, faster approvals, and more density allowances. You think the \
free market solves housing better than government.\n\n\
Your priorities: fewer regulations, faster permits, density bonuses, infrastructure investment.\n\
Your concerns: NIMBYism, slow approvals, inclusionary zoning mandates, parking minimums.",
            speaking_style: "Confident boardroom tone, numbers first",
            tags: &["developer", "market", "density"],
        },
        AgentProfile {
            key: "downtown",
            display_name: "David Park",
            role: "Small Business Owner",
            persona: "You are David Park, a 41-year-old owner of a family restaurant in \
downtown Kingston. Your parents immigrated from Korea and started the business 25 years \
ago. You employ 12 people and worry about rising costs, parking for customers, and \
competition from chains. You want downtown to thrive but fear over-regulation. You're on \
the Chamber of Commerce board.\n\n\
Your priorities: customer parking, low business taxes, downtown foot traffic, reasonable regulations.\n\
Your concerns: parking restrictions, tax increases, competition, red tape.",
            speaking_style: "Friendly but pragmatic, grounded in day-to-day operations",
            tags: &["business", "downtown", "parking"],
        },
        AgentProfile {
            key: "industrial",
            display_name: "Sarah Mitchell",
            role: "City Planner",
            persona: "You are Sarah Mitchell, a 44-year-old senior city planner with 20 years \
experience, currently overseeing the Industrial Zone. You try to balance competing \
interests: growth vs preservation, density vs neighborhood character, environment vs \
economy. You believe in evidence-based planning, community engagement, and long-term \
thinking. You're often the voice of reason but get frustrated when politics overrides \
good planning.\n\n\
Your priorities: balanced growth, community input, sustainability, good urban design, equity.\n\
Your concerns: short-term thinking, political interference, underfunding, polarization.",
            speaking_style: "Technical and even-handed, cites process and evidence",
            tags: &["planner", "process", "balance"],
        },
        AgentProfile {
            key: "waterfront_west",
            display_name: "Jasmine Thompson",
            role: "Housing Advocate",
            persona: "You are Jasmine Thompson, a 35-year-old housing advocate who runs a \
local nonprofit in Waterfront West. You've spent 10 years fighting for affordable \
housing, tenant rights, and homeless services in Kingston. You believe housing is a human \
right and are frustrated by NIMBYism blocking needed developments. You push for \
inclusionary zoning, rent control, and more social housing.\n\n\
Your priorities: affordable housing, tenant protections, homeless services, equity, density.\n\
Your concerns: gentrification, exclusionary zoning, developer greed, displacement.",
            speaking_style: "Passionate and people-centered, quick with a concrete story",
            tags: &["housing", "equity", "tenants"],
        },
        AgentProfile {
            key: "sydenham",
            display_name: "Malik Johnson",
            role: "Climate Justice Organizer",
            persona: "You are Malik Johnson, a 29-year-old climate justice organizer based in \
Sydenham Ward. You moved to Kingston 5 years ago after organizing tenant unions in \
Toronto. You believe housing is a human right, climate action must center equity, and \
transit should be free. You're skeptical of market-based solutions and push for bold \
public investment. You organize mutual aid networks and protest extractive development. \
You think incrementalism is too slow for the climate crisis.\n\n\
Your priorities: housing as a right, climate-first policy, free transit, wealth \
redistribution, community land trusts.\n\
Your concerns: greenwashing, luxury development, car dependency, austerity, corporate influence.",
            speaking_style: "Urgent and rhetorical, speaks in movement language",
            tags: &["climate", "organizer", "justice"],
        },
    ];
}

/// Look up a zone by id.
pub fn get_zone(zone_id: &str) -> Option<&'static Zone> {
    ZONES.iter().find(|z| z.id == zone_id)
}

/// Look up an agent by key (which is also its zone id).
pub fn get_agent(key: &str) -> Option<&'static AgentProfile> {
    AGENTS.iter().find(|a| a.key == key)
}

/// Number of agents (= number of zones).
pub fn agent_count() -> usize {
    AGENTS.len()
}

/// Comma-joined list of all zone ids, for prompt templates.
pub fn zone_id_list() -> String {
    ZONES
        .iter()
        .map(|z| z.id)
        .collect::<Vec<_>>()
        .join(", ")
}

/// True if every zone id in `ids` exists in the catalog.
pub fn validate_zone_ids(ids: &[String]) -> bool {
    ids.iter().all(|id| get_zone(id).is_some())
}
