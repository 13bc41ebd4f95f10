//! Mutations and mutation types.
//!
//! A `Mutation` is immutable once created and is shared by reference:
//! every genome carrying it holds the same allocation, so identity
//! comparisons and frequency counts work on addresses. A
//! `MutationType` groups mutations sharing a dominance coefficient and
//! a selection-coefficient distribution.

use std::cell::OnceCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use demevo_script::parser::parse_and_optimize;
use demevo_script::{AstNode, FunctionRegistry, Interpreter, SharedStream};

use crate::errors::SimulationError;

/// The distribution a mutation type draws selection coefficients from.
///
/// Exponential and gamma distributions take a (possibly negative) mean;
/// the sign of the mean is the sign of the draw. The script kind
/// re-evaluates an expression per draw against the shared stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SelectionDistribution {
    Fixed { s: f64 },
    Exponential { mean: f64 },
    Gamma { mean: f64, shape: f64 },
    Normal { mean: f64, sd: f64 },
    Script { source: String },
}

impl SelectionDistribution {
    /// The one-letter code used in script and dump output
    /// ("f", "e", "g", "n", "s").
    pub fn kind_letter(&self) -> &'static str {
        match self {
            Self::Fixed { .. } => "f",
            Self::Exponential { .. } => "e",
            Self::Gamma { .. } => "g",
            Self::Normal { .. } => "n",
            Self::Script { .. } => "s",
        }
    }

    pub fn parameters(&self) -> Vec<f64> {
        match self {
            Self::Fixed { s } => vec![*s],
            Self::Exponential { mean } => vec![*mean],
            Self::Gamma { mean, shape } => vec![*mean, *shape],
            Self::Normal { mean, sd } => vec![*mean, *sd],
            Self::Script { .. } => Vec::new(),
        }
    }

    /// Build from the one-letter code and numeric parameters, as the
    /// `initializeMutationType` call supplies them.
    pub fn from_code(code: &str, params: &[f64]) -> Result<Self, SimulationError> {
        let expect = |n: usize| {
            if params.len() == n {
                Ok(())
            } else {
                Err(SimulationError::InvalidParameter(format!(
                    "distribution \"{code}\" requires {n} parameter(s), {} supplied",
                    params.len()
                )))
            }
        };
        match code {
            "f" => {
                expect(1)?;
                Ok(Self::Fixed { s: params[0] })
            }
            "e" => {
                expect(1)?;
                Ok(Self::Exponential { mean: params[0] })
            }
            "g" => {
                expect(2)?;
                Ok(Self::Gamma {
                    mean: params[0],
                    shape: params[1],
                })
            }
            "n" => {
                expect(2)?;
                Ok(Self::Normal {
                    mean: params[0],
                    sd: params[1],
                })
            }
            other => Err(SimulationError::InvalidParameter(format!(
                "unknown selection-coefficient distribution \"{other}\""
            ))),
        }
    }

    fn validate(&self) -> Result<(), SimulationError> {
        match self {
            Self::Gamma { shape, .. } if *shape <= 0.0 => {
                Err(SimulationError::InvalidParameter(
                    "gamma distribution requires shape > 0".into(),
                ))
            }
            Self::Normal { sd, .. } if *sd < 0.0 => Err(SimulationError::InvalidParameter(
                "normal distribution requires sd >= 0".into(),
            )),
            Self::Exponential { mean } | Self::Gamma { mean, .. } if *mean == 0.0 => {
                Err(SimulationError::InvalidParameter(
                    "exponential/gamma distribution requires mean != 0".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Cached machinery for a script-defined distribution.
struct ScriptDraw {
    registry: Rc<FunctionRegistry>,
    root: AstNode,
}

/// A class of mutations sharing dominance and a selection-coefficient
/// distribution.
pub struct MutationType {
    pub id: i64,
    pub dominance_coeff: f64,
    pub distribution: SelectionDistribution,
    script_cache: OnceCell<ScriptDraw>,
}

impl std::fmt::Debug for MutationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MutationType(m{}, h={}, {:?})",
            self.id, self.dominance_coeff, self.distribution
        )
    }
}

impl MutationType {
    pub fn new(
        id: i64,
        dominance_coeff: f64,
        distribution: SelectionDistribution,
    ) -> Result<Self, SimulationError> {
        if !dominance_coeff.is_finite() {
            return Err(SimulationError::InvalidParameter(
                "dominance coefficient must be finite".into(),
            ));
        }
        distribution.validate()?;
        Ok(Self {
            id,
            dominance_coeff,
            distribution,
            script_cache: OnceCell::new(),
        })
    }

    /// The symbol this type is bound to in scripts ("m1" for id 1).
    pub fn symbol(&self) -> String {
        format!("m{}", self.id)
    }

    /// Draw one selection coefficient from the shared stream.
    pub fn draw_selection_coeff(&self, stream: &SharedStream) -> Result<f64, SimulationError> {
        match &self.distribution {
            SelectionDistribution::Fixed { s } => Ok(*s),
            SelectionDistribution::Exponential { mean } => {
                // inverse transform; the sign of the mean is the sign
                // of the draw
                let u = 1.0 - stream.borrow_mut().uniform();
                Ok(-mean * u.ln())
            }
            SelectionDistribution::Gamma { mean, shape } => {
                use rand_distr::Distribution;
                let scale = (mean / shape).abs();
                let sign = if *mean < 0.0 { -1.0 } else { 1.0 };
                let gamma = rand_distr::Gamma::new(*shape, scale).map_err(|e| {
                    SimulationError::InvalidParameter(format!("gamma draw: {e}"))
                })?;
                let mut stream = stream.borrow_mut();
                Ok(sign * gamma.sample(stream.rng_mut()))
            }
            SelectionDistribution::Normal { mean, sd } => {
                use rand_distr::Distribution;
                let normal = rand_distr::Normal::new(*mean, *sd).map_err(|e| {
                    SimulationError::InvalidParameter(format!("normal draw: {e}"))
                })?;
                let mut stream = stream.borrow_mut();
                Ok(normal.sample(stream.rng_mut()))
            }
            SelectionDistribution::Script { source } => {
                let cache = match self.script_cache.get() {
                    Some(cache) => cache,
                    None => {
                        let registry = FunctionRegistry::standard();
                        let root = parse_and_optimize(source, &registry)?;
                        let _ = self.script_cache.set(ScriptDraw { registry, root });
                        self.script_cache.get().expect("just set")
                    }
                };
                let mut interp =
                    Interpreter::new(Rc::clone(&cache.registry), Rc::clone(stream));
                let value = interp.evaluate_block(&cache.root)?;
                if value.count() != 1 {
                    return Err(SimulationError::InvalidParameter(
                        "script distribution must produce a numeric singleton".into(),
                    ));
                }
                Ok(value.float_at(0)?)
            }
        }
    }
}

/// A single mutation: immutable after creation, shared by reference
/// among all genomes carrying it.
#[derive(Debug)]
pub struct Mutation {
    pub mutation_type: Rc<MutationType>,
    pub position: u32,
    pub selection_coeff: f64,
    pub subpop_origin: i64,
    pub generation_origin: i64,
}

impl Mutation {
    pub fn new(
        mutation_type: Rc<MutationType>,
        position: u32,
        selection_coeff: f64,
        subpop_origin: i64,
        generation_origin: i64,
    ) -> Rc<Self> {
        Rc::new(Self {
            mutation_type,
            position,
            selection_coeff,
            subpop_origin,
            generation_origin,
        })
    }
}

/// Stable per-allocation key for counting mutation occurrences.
pub fn mutation_key(m: &Rc<Mutation>) -> usize {
    Rc::as_ptr(m) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use demevo_script::rng::shared;

    #[test]
    fn test_distribution_codes() {
        let d = SelectionDistribution::from_code("f", &[0.1]).unwrap();
        assert_eq!(d.kind_letter(), "f");
        assert_eq!(d.parameters(), vec![0.1]);

        let d = SelectionDistribution::from_code("g", &[-0.02, 0.5]).unwrap();
        assert_eq!(d.kind_letter(), "g");

        assert!(SelectionDistribution::from_code("f", &[]).is_err());
        assert!(SelectionDistribution::from_code("q", &[1.0]).is_err());
    }

    #[test]
    fn test_mutation_type_validation() {
        assert!(MutationType::new(1, 0.5, SelectionDistribution::Fixed { s: 0.0 }).is_ok());
        assert!(
            MutationType::new(1, 0.5, SelectionDistribution::Gamma { mean: 0.1, shape: 0.0 })
                .is_err()
        );
        assert!(
            MutationType::new(1, 0.5, SelectionDistribution::Normal { mean: 0.0, sd: -1.0 })
                .is_err()
        );
        assert!(
            MutationType::new(1, 0.5, SelectionDistribution::Exponential { mean: 0.0 }).is_err()
        );
    }

    #[test]
    fn test_fixed_draw() {
        let mt = MutationType::new(1, 0.5, SelectionDistribution::Fixed { s: 0.1 }).unwrap();
        let stream = shared(1);
        assert_eq!(mt.draw_selection_coeff(&stream).unwrap(), 0.1);
    }

    #[test]
    fn test_exponential_draw_sign_and_mean() {
        let mt =
            MutationType::new(1, 0.5, SelectionDistribution::Exponential { mean: -0.02 }).unwrap();
        let stream = shared(7);
        let n = 20_000;
        let mut total = 0.0;
        for _ in 0..n {
            let s = mt.draw_selection_coeff(&stream).unwrap();
            assert!(s <= 0.0);
            total += s;
        }
        let mean = total / n as f64;
        assert!((mean - -0.02).abs() < 0.001, "mean {mean}");
    }

    #[test]
    fn test_normal_draw_mean() {
        let mt = MutationType::new(
            1,
            0.5,
            SelectionDistribution::Normal { mean: 0.05, sd: 0.01 },
        )
        .unwrap();
        let stream = shared(3);
        let n = 10_000;
        let total: f64 = (0..n)
            .map(|_| mt.draw_selection_coeff(&stream).unwrap())
            .sum();
        assert!((total / n as f64 - 0.05).abs() < 0.001);
    }

    #[test]
    fn test_script_draw() {
        let mt = MutationType::new(
            1,
            0.5,
            SelectionDistribution::Script { source: "0.25 * 2;".into() },
        )
        .unwrap();
        let stream = shared(1);
        assert_eq!(mt.draw_selection_coeff(&stream).unwrap(), 0.5);
        // cached parse on the second draw
        assert_eq!(mt.draw_selection_coeff(&stream).unwrap(), 0.5);
    }

    #[test]
    fn test_script_draw_uses_shared_stream() {
        let mt = MutationType::new(
            1,
            0.5,
            SelectionDistribution::Script { source: "runif(1);".into() },
        )
        .unwrap();
        let a = shared(11);
        let b = shared(11);
        assert_eq!(
            mt.draw_selection_coeff(&a).unwrap(),
            mt.draw_selection_coeff(&b).unwrap()
        );
    }

    #[test]
    fn test_mutation_identity_key() {
        let mt = Rc::new(MutationType::new(1, 0.5, SelectionDistribution::Fixed { s: 0.0 }).unwrap());
        let m = Mutation::new(Rc::clone(&mt), 10, 0.0, 1, 1);
        let m2 = Rc::clone(&m);
        assert_eq!(mutation_key(&m), mutation_key(&m2));
        let other = Mutation::new(mt, 10, 0.0, 1, 1);
        assert_ne!(mutation_key(&m), mutation_key(&other));
    }

    #[test]
    fn test_distribution_serde_round_trip() {
        let d = SelectionDistribution::Gamma { mean: -0.03, shape: 0.2 };
        let json = serde_json::to_string(&d).unwrap();
        let back: SelectionDistribution = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind_letter(), "g");
        assert_eq!(back.parameters(), vec![-0.03, 0.2]);
    }
}
