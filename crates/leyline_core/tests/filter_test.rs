//! Archetype filtering and search-cache behavior.

use serde::{Deserialize, Serialize};

use leyline_core::{Component, EngineError, EntityId, Filter, MemoryStore, Search, World, WorldConfig};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Alpha {
    name: String,
}

impl Component for Alpha {
    const NAME: &'static str = "alpha";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Beta {
    name: String,
}

impl Component for Beta {
    const NAME: &'static str = "beta";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Gamma {
    name: String,
}

impl Component for Gamma {
    const NAME: &'static str = "gamma";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct A;

impl Component for A {
    const NAME: &'static str = "a";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct B;

impl Component for B {
    const NAME: &'static str = "b";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct C;

impl Component for C {
    const NAME: &'static str = "c";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct D;

impl Component for D {
    const NAME: &'static str = "d";
}

fn world_with_greek() -> World {
    let mut world = World::new(Box::new(MemoryStore::new()), WorldConfig::new("filters")).unwrap();
    world.register_component::<Alpha>().unwrap();
    world.register_component::<Beta>().unwrap();
    world.register_component::<Gamma>().unwrap();
    world.load_game_state().unwrap();
    world
}

#[test]
fn test_can_filter_by_archetype() {
    let mut world = world_with_greek();
    let mut ctx = world.context();

    let subset_count = 50;
    ctx.create_many(subset_count, (Alpha::default(), Beta::default()))
        .unwrap();
    ctx.create_many(20, (Alpha::default(), Beta::default(), Gamma::default()))
        .unwrap();

    // Exactly alpha+beta: the 20 three-component entities are excluded.
    let exact = Filter::exact(ctx.component_set::<(Alpha, Beta)>().unwrap());
    let mut count = 0;
    Search::new(exact)
        .each(&mut ctx, |ctx, id| {
            count += 1;
            assert!(matches!(
                ctx.get_component::<Gamma>(id),
                Err(EngineError::ComponentNotOnEntity { .. })
            ));
            true
        })
        .unwrap();
    assert_eq!(count, subset_count);

    let contains_alpha = Filter::contains(ctx.component_set::<(Alpha,)>().unwrap());
    assert_eq!(Search::new(contains_alpha).count(&ctx), 70);

    let contains_gamma = Filter::contains(ctx.component_set::<(Gamma,)>().unwrap());
    assert_eq!(Search::new(contains_gamma).count(&ctx), 20);
}

#[test]
fn test_exact_vs_contains() {
    let mut world = world_with_greek();
    let mut ctx = world.context();

    let alpha_count = 75;
    ctx.create_many(alpha_count, (Alpha::default(),)).unwrap();
    let both_count = 100;
    ctx.create_many(both_count, (Alpha::default(), Beta::default()))
        .unwrap();

    let alpha = ctx.component_set::<(Alpha,)>().unwrap();
    let beta = ctx.component_set::<(Beta,)>().unwrap();
    let both = ctx.component_set::<(Alpha, Beta)>().unwrap();
    let both_reversed = ctx.component_set::<(Beta, Alpha)>().unwrap();

    assert_eq!(Search::new(Filter::contains(alpha)).count(&ctx), alpha_count + both_count);
    assert_eq!(Search::new(Filter::contains(beta)).count(&ctx), both_count);
    assert_eq!(Search::new(Filter::exact(alpha)).count(&ctx), alpha_count);
    assert_eq!(Search::new(Filter::exact(both)).count(&ctx), both_count);
    // Order of the component list does not matter.
    assert_eq!(Search::new(Filter::exact(both_reversed)).count(&ctx), both_count);
}

#[test]
fn test_exact_filter_from_components_of() {
    let mut world = world_with_greek();
    let mut ctx = world.context();

    let want_count = 50;
    let ids = ctx
        .create_many(want_count, (Alpha::default(), Beta::default()))
        .unwrap();
    ctx.create_many(20, (Alpha::default(),)).unwrap();

    let set = ctx.components_of(ids[0]).unwrap();
    assert_eq!(Search::new(Filter::exact(set)).count(&ctx), want_count);
}

#[test]
fn test_search_cache_picks_up_new_archetypes() {
    let mut world = world_with_greek();
    let mut ctx = world.context();

    let alpha = ctx.component_set::<(Alpha,)>().unwrap();
    let mut search = Search::new(Filter::contains(alpha));
    assert_eq!(search.count(&ctx), 0);

    ctx.create_many(3, (Alpha::default(),)).unwrap();
    assert_eq!(search.count(&ctx), 3);

    // A new archetype created after the first evaluation is still found.
    ctx.create_many(2, (Alpha::default(), Gamma::default())).unwrap();
    assert_eq!(search.count(&ctx), 5);
}

#[test]
fn test_and_or_not_combinations() {
    let mut world = World::new(Box::new(MemoryStore::new()), WorldConfig::new("filters")).unwrap();
    world.register_component::<A>().unwrap();
    world.register_component::<B>().unwrap();
    world.register_component::<C>().unwrap();
    world.register_component::<D>().unwrap();
    world.load_game_state().unwrap();
    let mut ctx = world.context();

    let ab = ctx.create((A, B)).unwrap();
    let cd = ctx.create((C, D)).unwrap();
    let _bd = ctx.create((B, D)).unwrap();

    let set_ab = ctx.component_set::<(A, B)>().unwrap();
    let set_cd = ctx.component_set::<(C, D)>().unwrap();
    let set_a = ctx.component_set::<(A,)>().unwrap();
    let set_d = ctx.component_set::<(D,)>().unwrap();

    let mut ab_search = Search::new(Filter::contains(set_ab));
    ab_search
        .each(&mut ctx, |_ctx, id| {
            assert_eq!(id, ab);
            true
        })
        .unwrap();
    assert_eq!(ab_search.count(&ctx), 1);

    let mut cd_search = Search::new(Filter::contains(set_cd));
    cd_search
        .each(&mut ctx, |_ctx, id| {
            assert_eq!(id, cd);
            true
        })
        .unwrap();

    let either = Filter::or([Filter::contains(set_a), Filter::contains(set_d)]);
    assert_eq!(Search::new(either).count(&ctx), 3);

    let a_but_not_b = Filter::and([
        Filter::contains(set_a),
        Filter::not(Filter::contains(ctx.component_set::<(B,)>().unwrap())),
    ]);
    assert_eq!(Search::new(a_but_not_b).count(&ctx), 0);
}

#[test]
fn test_each_early_exit() {
    let mut world = world_with_greek();
    let mut ctx = world.context();
    ctx.create_many(10, (Alpha::default(),)).unwrap();

    let alpha = ctx.component_set::<(Alpha,)>().unwrap();
    let mut visited = 0;
    Search::new(Filter::contains(alpha))
        .each(&mut ctx, |_ctx, _id| {
            visited += 1;
            visited < 3
        })
        .unwrap();
    assert_eq!(visited, 3);
}

#[test]
fn test_first_returns_bad_id_when_empty() {
    let mut world = world_with_greek();
    let mut ctx = world.context();

    let gamma = ctx.component_set::<(Gamma,)>().unwrap();
    let mut search = Search::new(Filter::contains(gamma));
    assert_eq!(search.first(&ctx), EntityId::BAD);

    let id = ctx.create((Gamma::default(),)).unwrap();
    assert_eq!(search.first(&ctx), id);
    assert_eq!(search.must_first(&ctx), id);
}

#[test]
#[should_panic(expected = "no entity matches the search")]
fn test_must_first_panics_when_empty() {
    let mut world = world_with_greek();
    let mut ctx = world.context();
    let gamma = ctx.component_set::<(Gamma,)>().unwrap();
    let _ = Search::new(Filter::contains(gamma)).must_first(&ctx);
}

#[test]
fn test_entities_created_during_each_are_not_visited() {
    let mut world = world_with_greek();
    let mut ctx = world.context();
    ctx.create_many(5, (Alpha::default(),)).unwrap();

    let alpha = ctx.component_set::<(Alpha,)>().unwrap();
    let mut visited = 0;
    Search::new(Filter::contains(alpha))
        .each(&mut ctx, |ctx, _id| {
            // Spawning into the archetype being iterated must not extend
            // the current pass.
            ctx.create((Alpha::default(),)).unwrap();
            visited += 1;
            true
        })
        .unwrap();
    assert_eq!(visited, 5);
    drop(ctx);
    world.check_integrity().unwrap();
}
