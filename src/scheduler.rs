//! Which agents fire on a tick, and in what order.
//!
//! Everything here is pure. An agent with period `N` and offset `o` fires on
//! tick `t` when `t mod N == o mod N`, both residues taken in `[0, N)`. Agents
//! that fire together run in ascending `(fire_point, name)` order.

use crate::agent::resume::{Agent, Schedule};

/// Period used for scheduling. Non-positive periods are coerced to 1
/// (the agent fires every tick) rather than reaching a modulo.
pub fn normalized_period(schedule: &Schedule) -> u64 {
    if schedule.run_every_n_ticks <= 0 {
        1
    } else {
        schedule.run_every_n_ticks as u64
    }
}

/// `phase_offset mod N`, in `[0, N)`.
fn normalized_offset(schedule: &Schedule) -> u64 {
    let n = normalized_period(schedule) as i128;
    (schedule.phase_offset as i128).rem_euclid(n) as u64
}

/// Whether an agent with `schedule` fires on `tick`.
pub fn should_fire(schedule: &Schedule, tick: u64) -> bool {
    tick % normalized_period(schedule) == normalized_offset(schedule)
}

/// Tie-break position in `[0, 1)`: `((-offset) mod N) / N`.
pub fn fire_point(schedule: &Schedule) -> f64 {
    let n = normalized_period(schedule);
    let offset = normalized_offset(schedule);
    ((n - offset) % n) as f64 / n as f64
}

/// Firing agents for `tick`, in execution order.
///
/// Input order does not matter: equal fire points fall back to the name.
pub fn order_firing_agents(agents: &[Agent], tick: u64) -> Vec<&Agent> {
    order_firing_agents_with(agents, tick, |_| false)
}

/// Like [`order_firing_agents`], but agents for which `force` returns true
/// fire regardless of their schedule. Forced agents keep their fire point.
pub fn order_firing_agents_with<F>(agents: &[Agent], tick: u64, force: F) -> Vec<&Agent>
where
    F: Fn(&Agent) -> bool,
{
    let mut firing: Vec<(f64, &Agent)> = agents
        .iter()
        .filter(|agent| {
            if agent.schedule.run_every_n_ticks <= 0 {
                tracing::warn!(
                    event = "schedule_period_coerced",
                    agent = %agent.name,
                    run_every_n_ticks = agent.schedule.run_every_n_ticks,
                    "non-positive period treated as 1"
                );
            }
            should_fire(&agent.schedule, tick) || force(agent)
        })
        .map(|agent| (fire_point(&agent.schedule), agent))
        .collect();

    firing.sort_by(|(pa, a), (pb, b)| pa.total_cmp(pb).then_with(|| a.name.cmp(&b.name)));
    firing.into_iter().map(|(_, agent)| agent).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::resume::Resume;
    use crate::config::CreditDefaults;

    fn sched(n: i64, offset: i64) -> Schedule {
        Schedule {
            run_every_n_ticks: n,
            phase_offset: offset,
        }
    }

    fn agent(name: &str, n: i64, offset: i64) -> Agent {
        let mut resume = Resume::new(name, "test");
        resume.schedule = sched(n, offset);
        Agent::from_resume(&resume, format!("/tmp/{name}"), &CreditDefaults::default()).unwrap()
    }

    fn names(agents: &[&Agent]) -> Vec<String> {
        agents.iter().map(|a| a.name.clone()).collect()
    }

    #[test]
    fn fires_on_exactly_one_residue_class() {
        for n in 1..=7i64 {
            for offset in -9..=9i64 {
                let s = sched(n, offset);
                let hits: Vec<u64> = (0..n as u64).filter(|t| should_fire(&s, *t)).collect();
                assert_eq!(hits.len(), 1, "n={n} offset={offset}");
                for t in 0..40u64 {
                    assert_eq!(should_fire(&s, t), should_fire(&s, t + n as u64));
                }
            }
        }
    }

    #[test]
    fn researcher_fires_on_one_mod_three() {
        let s = sched(3, 1);
        let fired: Vec<u64> = (0..11).filter(|t| should_fire(&s, *t)).collect();
        assert_eq!(fired, vec![1, 4, 7, 10]);
    }

    #[test]
    fn negative_offset_is_normalized() {
        let s = sched(4, -1);
        let fired: Vec<u64> = (0..9).filter(|t| should_fire(&s, *t)).collect();
        assert_eq!(fired, vec![3, 7]);
    }

    #[test]
    fn fire_points_for_period_four() {
        let points: Vec<f64> = (0..4).map(|o| fire_point(&sched(4, o))).collect();
        assert_eq!(points, vec![0.0, 0.75, 0.5, 0.25]);
        for offset in -20..20 {
            let p = fire_point(&sched(4, offset));
            assert!((0.0..1.0).contains(&p));
        }
    }

    #[test]
    fn non_positive_period_always_fires() {
        for n in [0, -3] {
            let s = sched(n, 5);
            assert_eq!(normalized_period(&s), 1);
            assert!((0..10).all(|t| should_fire(&s, t)));
            assert_eq!(fire_point(&s), 0.0);
        }
    }

    #[test]
    fn planner_and_coder_tie_break_by_name() {
        let agents = vec![agent("planner", 2, 0), agent("coder", 1, 0)];
        assert_eq!(names(&order_firing_agents(&agents, 4)), vec!["coder", "planner"]);
        assert_eq!(names(&order_firing_agents(&agents, 5)), vec!["coder"]);
    }

    #[test]
    fn order_is_independent_of_input_order() {
        let mut agents = vec![
            agent("delta", 4, 1),
            agent("alpha", 1, 0),
            agent("gamma", 4, 3),
            agent("beta", 2, 0),
            agent("echo", 4, 2),
        ];
        let forward = names(&order_firing_agents(&agents, 0));
        agents.reverse();
        let backward = names(&order_firing_agents(&agents, 0));
        assert_eq!(forward, backward);
        assert_eq!(forward, vec!["alpha", "beta"]);
    }

    #[test]
    fn lower_fire_point_runs_first() {
        // All fire on tick 3 with period 1 or a matching offset.
        let agents = vec![agent("zeta", 1, 0), agent("alpha", 4, 3), agent("mid", 2, 1)];
        // zeta: 0.0, alpha: 0.25, mid: 0.5
        assert_eq!(
            names(&order_firing_agents(&agents, 3)),
            vec!["zeta", "alpha", "mid"]
        );
    }

    #[test]
    fn forced_agent_joins_off_schedule() {
        let agents = vec![agent("manager", 5, 2), agent("coder", 1, 0)];
        let forced = order_firing_agents_with(&agents, 0, |a| a.name == "manager");
        // manager: fire point 3/5 = 0.6, after coder at 0.0
        assert_eq!(names(&forced), vec!["coder", "manager"]);
        assert_eq!(names(&order_firing_agents(&agents, 0)), vec!["coder"]);
        // Already firing on its own schedule: listed once.
        let on_schedule = order_firing_agents_with(&agents, 2, |a| a.name == "manager");
        assert_eq!(names(&on_schedule), vec!["coder", "manager"]);
    }
}
