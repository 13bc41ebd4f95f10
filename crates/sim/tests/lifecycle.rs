//! Integration tests for end-to-end simulation workflows driven the way
//! an embedder drives them: a script in, generations stepped, state
//! inspected through `evaluate`.

use demevo_sim::{Simulation, SimulationError};
use demevo_script::Value;

const NEUTRAL_SCRIPT: &str = "
    initialize {
        initializeMutationRate(1e-6);
        initializeMutationType('m1', 0.5, 'f', 0.0);
        initializeGenomicElementType('g1', m1, 1.0);
        initializeGenomicElement(g1, 0, 99999);
        initializeRecombinationRate(1e-7);
    }
    1 early { sim.addSubpop('p1', 30); }
    30 late { }
";

#[test]
fn test_neutral_run_to_termination() {
    let mut sim = Simulation::new(NEUTRAL_SCRIPT, Some(42)).unwrap();
    let steps = sim.run(None).unwrap();
    assert_eq!(steps, 30);
    assert_eq!(sim.generation(), 31);
    assert_eq!(
        sim.evaluate("p1.individualCount;").unwrap(),
        Value::int(30)
    );
}

#[test]
fn test_genomes_stay_sorted_and_unfixed() {
    let mut sim = Simulation::new(NEUTRAL_SCRIPT, Some(7)).unwrap();
    sim.run(Some(15)).unwrap();

    // every genome is sorted by position
    let sorted = sim
        .evaluate(
            "ok = T; \
             for (g in p1.genomes) { \
                 pos = g.mutations.position; \
                 if (size(pos) < 2) next; \
                 ok = ok & all(pos[0:(size(pos) - 2)] <= pos[1:(size(pos) - 1)]); \
             } ok;",
        )
        .unwrap();
    assert_eq!(sorted, Value::logical_vec(vec![true]));

    // no segregating mutation is at frequency 1 (those are substituted)
    let frequencies = sim
        .evaluate("freqs = sim.mutationFrequencies(NULL); size(freqs) == 0 | all(freqs < 1.0);")
        .unwrap();
    assert_eq!(frequencies, Value::logical_vec(vec![true]));
}

#[test]
fn test_seed_reproducibility_across_instances() {
    let run = |seed| {
        let mut sim = Simulation::new(NEUTRAL_SCRIPT, Some(seed)).unwrap();
        sim.run(None).unwrap();
        let mut dump = Vec::new();
        sim.dump_population(&mut dump).unwrap();
        dump
    };
    assert_eq!(run(1), run(1));
    assert_ne!(run(1), run(2));
}

#[test]
fn test_selection_beats_drift() {
    // strongly deleterious mutations should be rarer than neutral ones
    // under selection with the same mutational input
    let script = |s: &str| {
        format!(
            "
            initialize {{
                initializeMutationRate(1e-5);
                initializeMutationType('m1', 0.5, 'f', {s});
                initializeGenomicElementType('g1', m1, 1.0);
                initializeGenomicElement(g1, 0, 99999);
                initializeRecombinationRate(1e-8);
            }}
            1 early {{ sim.addSubpop('p1', 50); }}
            40 late {{ }}
        "
        )
    };
    let count_of = |source: &str| {
        let mut sim = Simulation::new(source, Some(99)).unwrap();
        sim.run(None).unwrap();
        sim.evaluate("size(sim.mutations);")
            .unwrap()
            .int_at(0)
            .unwrap()
    };
    let neutral = count_of(&script("0.0"));
    let selected = count_of(&script("-0.9"));
    assert!(
        selected < neutral,
        "selection kept {selected} vs neutral {neutral}"
    );
}

#[test]
fn test_population_split_and_migration() {
    let script = "
        initialize {
            initializeMutationRate(1e-6);
            initializeMutationType('m1', 0.5, 'f', 0.0);
            initializeGenomicElementType('g1', m1, 1.0);
            initializeGenomicElement(g1, 0, 9999);
            initializeRecombinationRate(1e-8);
        }
        1 early { sim.addSubpop('p1', 20); }
        5 early {
            sim.addSubpopSplit('p2', 10, p1);
            p2.setMigrationRates(p1, 0.2);
        }
        20 late { }
    ";
    let mut sim = Simulation::new(script, Some(3)).unwrap();
    sim.run(None).unwrap();
    assert_eq!(
        sim.evaluate("size(sim.subpopulations);").unwrap(),
        Value::int(2)
    );
    assert_eq!(
        sim.evaluate("p2.individualCount;").unwrap(),
        Value::int(10)
    );
    assert_eq!(
        sim.evaluate("sim.subpopulations.id;").unwrap(),
        Value::int_vec(vec![1, 2])
    );
}

#[test]
fn test_subpopulation_removal_via_size_zero() {
    let script = "
        initialize {
            initializeMutationRate(1e-7);
            initializeMutationType('m1', 0.5, 'f', 0.0);
            initializeGenomicElementType('g1', m1, 1.0);
            initializeGenomicElement(g1, 0, 999);
            initializeRecombinationRate(1e-8);
        }
        1 early {
            sim.addSubpop('p1', 10);
            sim.addSubpop('p2', 10);
        }
        3 early { p2.setSubpopulationSize(0); }
        10 late { }
    ";
    let mut sim = Simulation::new(script, Some(5)).unwrap();
    sim.run(None).unwrap();
    assert_eq!(
        sim.evaluate("size(sim.subpopulations);").unwrap(),
        Value::int(1)
    );
}

#[test]
fn test_dump_load_round_trip_is_exact() {
    let mut sim = Simulation::new(NEUTRAL_SCRIPT, Some(13)).unwrap();
    sim.run(Some(10)).unwrap();

    let mut dump = Vec::new();
    sim.dump_population(&mut dump).unwrap();

    let mut restored = Simulation::new(NEUTRAL_SCRIPT, Some(13)).unwrap();
    restored.initialize().unwrap();
    restored.load_population(&mut dump.as_slice()).unwrap();

    let mut dump_again = Vec::new();
    restored.dump_population(&mut dump_again).unwrap();
    assert_eq!(dump, dump_again);

    // the restored simulation keeps running
    assert!(restored.run_one_generation().unwrap());
}

#[test]
fn test_output_full_writes_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pop.txt");
    let script_path = path.to_str().unwrap().replace('\\', "/");

    let mut sim = Simulation::new(NEUTRAL_SCRIPT, Some(21)).unwrap();
    sim.run(Some(5)).unwrap();
    sim.evaluate(&format!("sim.outputFull('{script_path}');"))
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("#OUT: 6 A"));
    assert!(text.contains("Populations:"));
    assert!(text.contains("Genomes:"));

    // and readFromPopulationFile is its inverse
    sim.evaluate(&format!("sim.readFromPopulationFile('{script_path}');"))
        .unwrap();
    assert_eq!(sim.generation(), 6);
}

#[test]
fn test_output_full_to_console_buffer() {
    let mut sim = Simulation::new(NEUTRAL_SCRIPT, Some(21)).unwrap();
    sim.run(Some(2)).unwrap();
    sim.evaluate("cat('before '); sim.outputFull(); cat('after');")
        .unwrap();
    let output = sim.take_output();
    assert!(output.starts_with("before #OUT:"));
    assert!(output.ends_with("after"));
}

#[test]
fn test_heterozygote_and_homozygote_fitness_scenario() {
    // construct a diploid carrying m with s=0.1, h=0.5 on one genome:
    // fitness 1.05; on both genomes: 1.10
    use demevo_sim::genome::Genome;
    use demevo_sim::mutation::{Mutation, MutationType, SelectionDistribution};
    use demevo_sim::diploid_fitness;
    use std::rc::Rc;

    let mt = Rc::new(
        MutationType::new(1, 0.5, SelectionDistribution::Fixed { s: 0.1 }).unwrap(),
    );
    let m = Mutation::new(Rc::clone(&mt), 1000, 0.1, 1, 1);

    let het1 = Genome::from_mutations(vec![Rc::clone(&m)]);
    let het2 = Genome::new();
    assert!((diploid_fitness(&het1, &het2) - 1.05).abs() < 1e-12);

    let hom1 = Genome::from_mutations(vec![Rc::clone(&m)]);
    let hom2 = Genome::from_mutations(vec![m]);
    assert!((diploid_fitness(&hom1, &hom2) - 1.10).abs() < 1e-12);
}

#[test]
fn test_script_error_poisons_run() {
    let script = "
        initialize {
            initializeMutationRate(1e-7);
            initializeMutationType('m1', 0.5, 'f', 0.0);
            initializeGenomicElementType('g1', m1, 1.0);
            initializeGenomicElement(g1, 0, 999);
            initializeRecombinationRate(1e-8);
        }
        1 early { sim.addSubpop('p1', 10); }
        2 late { p1.setSelfingRate(2.0); }
        10 late { }
    ";
    let mut sim = Simulation::new(script, Some(1)).unwrap();
    let err = sim.run(None).unwrap_err();
    assert!(matches!(err, SimulationError::Script(_)));
    assert!(format!("{err}").contains("selfing fraction"));
}

#[test]
fn test_gene_conversion_configured_run() {
    let script = "
        initialize {
            initializeMutationRate(1e-6);
            initializeMutationType('m1', 0.5, 'f', 0.0);
            initializeGenomicElementType('g1', m1, 1.0);
            initializeGenomicElement(g1, 0, 99999);
            initializeRecombinationRate(1e-6);
            initializeGeneConversion(0.5, 20.0);
        }
        1 early { sim.addSubpop('p1', 20); }
        15 late { }
    ";
    let mut sim = Simulation::new(script, Some(31)).unwrap();
    sim.run(None).unwrap();
    assert_eq!(
        sim.evaluate("sim.chromosome.geneConversionFraction;").unwrap(),
        Value::float(0.5)
    );
    assert_eq!(
        sim.evaluate("sim.chromosome.geneConversionMeanLength;").unwrap(),
        Value::float(20.0)
    );
}

#[test]
fn test_script_distribution_mutation_type() {
    let script = "
        initialize {
            initializeMutationRate(1e-5);
            initializeMutationType('m1', 0.5, 's', 'return 0.01;');
            initializeGenomicElementType('g1', m1, 1.0);
            initializeGenomicElement(g1, 0, 9999);
            initializeRecombinationRate(1e-8);
        }
        1 early { sim.addSubpop('p1', 10); }
        10 late { }
    ";
    let mut sim = Simulation::new(script, Some(8)).unwrap();
    sim.run(None).unwrap();
    // every drawn mutation took its coefficient from the script
    let ok = sim
        .evaluate(
            "muts = sim.mutations; \
             size(muts) == 0 | all(muts.selectionCoeff == 0.01);",
        )
        .unwrap();
    assert_eq!(ok, Value::logical_vec(vec![true]));
}
