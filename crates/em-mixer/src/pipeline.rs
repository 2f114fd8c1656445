//! The DSP pipeline graph
//!
//! A DAG of typed nodes executed per active layer before mixing. Node
//! kinds are a closed set, so dispatch is a match on a tagged variant
//! rather than a vtable. The graph is validated and topologically sorted
//! at configuration time; execution walks the sorted order with one
//! preallocated buffer per node.

use em_core::{AudioBuffer, EngineError, EngineResult};
use em_spatial::{BinauralDecoder, HrirSphere, SphereSampling};
use serde::{Deserialize, Serialize};

use crate::layer::SpatialParams;
use crate::nodes::{
    AttenuationState, NodeContext, NodeState, OcclusionCurves, OcclusionState, PannerState,
    ReverbState, process_ambisonic_panner, process_ambisonic_rotator, process_attenuation,
    process_binaural_decoder, process_occlusion, process_reverb, process_stereo_panner,
};
use crate::sound::Spatialization;

/// Widest intermediate format (first-order ambisonics)
const MAX_PIPELINE_WIDTH: usize = 4;

/// Distance under which the near-field boost engages, in meters
const NEAR_FIELD_DISTANCE: f32 = 1.0;

/// The fixed set of pipeline node kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Reads the mixer-supplied converted source chunk
    Input,
    /// Distance gain curve plus optional air absorption EQ
    Attenuation,
    /// Gain and low-pass from the layer's occlusion factor
    Occlusion,
    /// Gain and low-pass from the layer's obstruction factor
    Obstruction,
    /// Constant-power panning for non-HRTF position spatialization
    StereoPanner,
    /// Mono source to first-order ambisonics
    AmbisonicPanner,
    /// Rotate the soundfield by the inverse listener orientation
    AmbisonicRotator,
    /// HRIR convolution of the soundfield to stereo
    AmbisonicBinauralDecoder,
    /// Proximity boost for very close sources
    NearField,
    /// Room reverb send
    Reverb,
    /// Hard clip to [-1, 1]
    Clip,
    /// Clamp to a configurable ceiling
    Clamp { ceiling: f32 },
    /// Weighted sum of all inputs
    Mix { weights: Vec<f32> },
    /// Terminal node, writes the mixer's result buffer
    Output,
}

/// One node entry in the pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: u32,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub inputs: Vec<u32>,
}

/// Pipeline-wide settings resolved from the engine configuration
pub struct PipelineSettings {
    pub device_sample_rate: u32,
    pub max_block_frames: usize,
    pub hrir: Option<HrirSphere>,
    pub hrir_sampling: SphereSampling,
    pub occlusion_curves: OcclusionCurves,
    pub obstruction_curves: OcclusionCurves,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            device_sample_rate: 48000,
            max_block_frames: 2048,
            hrir: None,
            hrir_sampling: SphereSampling::default(),
            occlusion_curves: OcclusionCurves::default(),
            obstruction_curves: OcclusionCurves::default(),
        }
    }
}

/// The compiled pipeline
pub struct Pipeline {
    specs: Vec<NodeSpec>,
    /// Topological execution order (indices into `specs`)
    order: Vec<usize>,
    /// Resolved input indices per node
    input_indices: Vec<Vec<usize>>,
    output_index: usize,
    buffers: Vec<AudioBuffer>,
    widths: Vec<usize>,
    mono_scratch: Vec<f32>,
    decoder: Option<BinauralDecoder>,
    occlusion_curves: OcclusionCurves,
    obstruction_curves: OcclusionCurves,
    device_sample_rate: u32,
    max_block_frames: usize,
}

impl Pipeline {
    pub fn new(specs: Vec<NodeSpec>, settings: PipelineSettings) -> EngineResult<Self> {
        if specs.is_empty() {
            return Err(EngineError::ConfigInvalid("pipeline has no nodes".into()));
        }

        let output_count = specs.iter().filter(|s| s.kind == NodeKind::Output).count();
        if output_count != 1 {
            return Err(EngineError::ConfigInvalid(format!(
                "pipeline needs exactly one output node, found {output_count}"
            )));
        }
        if !specs.iter().any(|s| s.kind == NodeKind::Input) {
            return Err(EngineError::ConfigInvalid("pipeline has no input node".into()));
        }

        let index_of = |id: u32| specs.iter().position(|s| s.id == id);
        let mut input_indices = Vec::with_capacity(specs.len());
        for spec in &specs {
            if spec.kind == NodeKind::Input && !spec.inputs.is_empty() {
                return Err(EngineError::ConfigInvalid(format!(
                    "input node {} cannot have inputs",
                    spec.id
                )));
            }
            if spec.kind != NodeKind::Input && spec.inputs.is_empty() {
                return Err(EngineError::ConfigInvalid(format!(
                    "node {} has no inputs",
                    spec.id
                )));
            }
            let mut resolved = Vec::with_capacity(spec.inputs.len());
            for &input in &spec.inputs {
                let Some(index) = index_of(input) else {
                    return Err(EngineError::ConfigInvalid(format!(
                        "node {} references unknown node {input}",
                        spec.id
                    )));
                };
                resolved.push(index);
            }
            input_indices.push(resolved);
        }

        let order = topological_order(&specs, &input_indices)?;
        let output_index = specs
            .iter()
            .position(|s| s.kind == NodeKind::Output)
            .unwrap_or(specs.len() - 1);

        let decoder = settings
            .hrir
            .map(|mut sphere| {
                sphere.set_sampling(settings.hrir_sampling);
                BinauralDecoder::new(&sphere)
            });

        let buffers = specs
            .iter()
            .map(|_| AudioBuffer::new(settings.max_block_frames, MAX_PIPELINE_WIDTH))
            .collect();

        Ok(Self {
            widths: vec![0; specs.len()],
            input_indices,
            output_index,
            buffers,
            mono_scratch: vec![0.0; settings.max_block_frames],
            decoder,
            occlusion_curves: settings.occlusion_curves,
            obstruction_curves: settings.obstruction_curves,
            device_sample_rate: settings.device_sample_rate,
            max_block_frames: settings.max_block_frames,
            order,
            specs,
        })
    }

    /// The default spatialization chain used when the configuration does
    /// not override the pipeline.
    pub fn default_specs() -> Vec<NodeSpec> {
        let chain = [
            NodeKind::Input,
            NodeKind::Attenuation,
            NodeKind::Occlusion,
            NodeKind::Obstruction,
            NodeKind::NearField,
            NodeKind::AmbisonicPanner,
            NodeKind::AmbisonicRotator,
            NodeKind::AmbisonicBinauralDecoder,
            NodeKind::Reverb,
            NodeKind::Clip,
            NodeKind::Output,
        ];
        chain
            .into_iter()
            .enumerate()
            .map(|(i, kind)| NodeSpec {
                id: i as u32 + 1,
                kind,
                inputs: if i == 0 { vec![] } else { vec![i as u32] },
            })
            .collect()
    }

    pub fn max_block_frames(&self) -> usize {
        self.max_block_frames
    }

    pub fn node_count(&self) -> usize {
        self.specs.len()
    }

    /// Allocate per-layer node state for a source with the given channels.
    pub fn make_layer_states(&self, channels: usize) -> Vec<NodeState> {
        self.specs
            .iter()
            .map(|spec| match spec.kind {
                NodeKind::Attenuation => NodeState::Attenuation(AttenuationState::new(
                    channels.max(1),
                    self.max_block_frames,
                )),
                NodeKind::Occlusion | NodeKind::Obstruction => {
                    NodeState::Occlusion(OcclusionState::new(MAX_PIPELINE_WIDTH))
                }
                NodeKind::AmbisonicPanner => NodeState::AmbisonicPanner(PannerState::default()),
                NodeKind::AmbisonicBinauralDecoder => match &self.decoder {
                    Some(decoder) => NodeState::Binaural(decoder.make_state(self.max_block_frames)),
                    None => NodeState::None,
                },
                NodeKind::Reverb => {
                    NodeState::Reverb(ReverbState::new(2, self.device_sample_rate, 1.0))
                }
                _ => NodeState::None,
            })
            .collect()
    }

    /// Execute the graph for one layer.
    ///
    /// Returns the output channel width, or `None` when a node
    /// short-circuited to silence and the mixer should skip the layer.
    pub fn execute(
        &mut self,
        spatial: &SpatialParams,
        obstruction: f32,
        occlusion: f32,
        node_states: &mut [NodeState],
        source: &AudioBuffer,
        source_channels: usize,
        frames: usize,
        output: &mut AudioBuffer,
    ) -> Option<usize> {
        let ctx = NodeContext {
            frames,
            sample_rate: self.device_sample_rate,
            spatial,
            obstruction,
            occlusion,
        };

        for position in 0..self.order.len() {
            let index = self.order[position];
            let kind = self.specs[index].kind.clone();
            let inputs = self.input_indices[index].clone();
            let in_width = inputs.first().map(|&i| self.widths[i]).unwrap_or(0);

            let mut work = std::mem::take(&mut self.buffers[index]);
            let state = node_states.get_mut(index);

            let width = match kind {
                NodeKind::Input => {
                    work.copy_from(0, source, 0, frames);
                    source_channels
                }
                NodeKind::Attenuation => {
                    let input = &self.buffers[inputs[0]];
                    match state {
                        Some(NodeState::Attenuation(attenuation_state)) => {
                            if !process_attenuation(&ctx, attenuation_state, input, &mut work, in_width)
                            {
                                self.buffers[index] = work;
                                return None;
                            }
                        }
                        _ => work.copy_from(0, input, 0, frames),
                    }
                    in_width
                }
                NodeKind::Occlusion | NodeKind::Obstruction => {
                    work.copy_from(0, &self.buffers[inputs[0]], 0, frames);
                    if let Some(NodeState::Occlusion(occlusion_state)) = state {
                        let (curves, factor) = if kind == NodeKind::Occlusion {
                            (&self.occlusion_curves, occlusion)
                        } else {
                            (&self.obstruction_curves, obstruction)
                        };
                        process_occlusion(&ctx, curves, occlusion_state, factor, &mut work, in_width);
                    }
                    in_width
                }
                NodeKind::StereoPanner => {
                    process_stereo_panner(&ctx, &self.buffers[inputs[0]], &mut work, in_width)
                }
                NodeKind::AmbisonicPanner => {
                    let input = &self.buffers[inputs[0]];
                    match state {
                        Some(NodeState::AmbisonicPanner(panner_state)) => process_ambisonic_panner(
                            &ctx,
                            panner_state,
                            input,
                            &mut work,
                            in_width,
                            &mut self.mono_scratch,
                        ),
                        _ => {
                            work.copy_from(0, input, 0, frames);
                            in_width
                        }
                    }
                }
                NodeKind::AmbisonicRotator => {
                    work.copy_from(0, &self.buffers[inputs[0]], 0, frames);
                    if in_width >= 4 { process_ambisonic_rotator(&ctx, &mut work) } else { in_width }
                }
                NodeKind::AmbisonicBinauralDecoder => {
                    let input = &self.buffers[inputs[0]];
                    match state {
                        Some(NodeState::Binaural(binaural_state)) => process_binaural_decoder(
                            &ctx,
                            self.decoder.as_ref(),
                            binaural_state,
                            input,
                            &mut work,
                            in_width,
                        ),
                        _ => process_stereo_panner(&ctx, input, &mut work, in_width.min(2)),
                    }
                }
                NodeKind::NearField => {
                    work.copy_from(0, &self.buffers[inputs[0]], 0, frames);
                    if spatial.spatialization != Spatialization::None {
                        let distance = ctx.distance();
                        if distance < NEAR_FIELD_DISTANCE {
                            let boost = 1.0 + (NEAR_FIELD_DISTANCE - distance).min(1.0);
                            for ch in 0..in_width {
                                em_dsp::apply_gain(&mut work.channel_mut(ch)[..frames], boost);
                            }
                        }
                    }
                    in_width
                }
                NodeKind::Reverb => {
                    work.copy_from(0, &self.buffers[inputs[0]], 0, frames);
                    if let Some(NodeState::Reverb(reverb_state)) = state {
                        process_reverb(&ctx, reverb_state, &mut work, in_width);
                    }
                    in_width
                }
                NodeKind::Clip => {
                    work.copy_from(0, &self.buffers[inputs[0]], 0, frames);
                    for ch in 0..in_width {
                        em_dsp::clip(&mut work.channel_mut(ch)[..frames]);
                    }
                    in_width
                }
                NodeKind::Clamp { ceiling } => {
                    work.copy_from(0, &self.buffers[inputs[0]], 0, frames);
                    let ceiling = ceiling.abs();
                    for ch in 0..in_width {
                        for s in &mut work.channel_mut(ch)[..frames] {
                            *s = s.clamp(-ceiling, ceiling);
                        }
                    }
                    in_width
                }
                NodeKind::Mix { ref weights } => {
                    work.clear();
                    let mut width = 0;
                    for (slot, &input_index) in inputs.iter().enumerate() {
                        let weight = weights.get(slot).copied().unwrap_or(1.0);
                        let input = &self.buffers[input_index];
                        let input_width = self.widths[input_index];
                        width = width.max(input_width);
                        for ch in 0..input_width {
                            let src = input.channel(ch);
                            let dst = work.channel_mut(ch);
                            for i in 0..frames {
                                dst[i] += src[i] * weight;
                            }
                        }
                    }
                    width
                }
                NodeKind::Output => {
                    output.copy_from(0, &self.buffers[inputs[0]], 0, frames);
                    in_width
                }
            };

            self.widths[index] = width;
            self.buffers[index] = work;
        }

        Some(self.widths[self.output_index])
    }
}

/// Kahn's algorithm over the resolved edges; cycles are a config error.
fn topological_order(specs: &[NodeSpec], input_indices: &[Vec<usize>]) -> EngineResult<Vec<usize>> {
    let n = specs.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (node, inputs) in input_indices.iter().enumerate() {
        in_degree[node] = inputs.len();
        for &input in inputs {
            dependents[input].push(node);
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(node) = ready.pop() {
        order.push(node);
        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() != n {
        return Err(EngineError::ConfigInvalid("pipeline graph contains a cycle".into()));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use em_spatial::Position3D;

    fn settings() -> PipelineSettings {
        PipelineSettings { max_block_frames: 64, ..Default::default() }
    }

    #[test]
    fn test_default_pipeline_builds() {
        let pipeline = Pipeline::new(Pipeline::default_specs(), settings()).unwrap();
        assert_eq!(pipeline.node_count(), 11);
    }

    #[test]
    fn test_missing_output_rejected() {
        let specs = vec![NodeSpec { id: 1, kind: NodeKind::Input, inputs: vec![] }];
        assert!(matches!(
            Pipeline::new(specs, settings()),
            Err(EngineError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let specs = vec![
            NodeSpec { id: 1, kind: NodeKind::Input, inputs: vec![] },
            NodeSpec { id: 2, kind: NodeKind::Clip, inputs: vec![3] },
            NodeSpec { id: 3, kind: NodeKind::Clip, inputs: vec![2] },
            NodeSpec { id: 4, kind: NodeKind::Output, inputs: vec![2] },
        ];
        assert!(Pipeline::new(specs, settings()).is_err());
    }

    #[test]
    fn test_unknown_input_rejected() {
        let specs = vec![
            NodeSpec { id: 1, kind: NodeKind::Input, inputs: vec![] },
            NodeSpec { id: 2, kind: NodeKind::Output, inputs: vec![99] },
        ];
        assert!(Pipeline::new(specs, settings()).is_err());
    }

    #[test]
    fn test_execute_passthrough_chain() {
        let specs = vec![
            NodeSpec { id: 1, kind: NodeKind::Input, inputs: vec![] },
            NodeSpec { id: 2, kind: NodeKind::Clip, inputs: vec![1] },
            NodeSpec { id: 3, kind: NodeKind::Output, inputs: vec![2] },
        ];
        let mut pipeline = Pipeline::new(specs, settings()).unwrap();
        let mut states = pipeline.make_layer_states(1);

        let mut source = AudioBuffer::new(64, 4);
        source.channel_mut(0).fill(2.0); // Clip should bring this to 1.0
        let mut output = AudioBuffer::new(64, 4);

        let spatial = SpatialParams::default();
        let width = pipeline
            .execute(&spatial, 0.0, 0.0, &mut states, &source, 1, 64, &mut output)
            .unwrap();
        assert_eq!(width, 1);
        assert_eq!(output.channel(0)[0], 1.0);
    }

    #[test]
    fn test_execute_spatial_chain_produces_stereo() {
        let mut pipeline = Pipeline::new(Pipeline::default_specs(), settings()).unwrap();
        let mut states = pipeline.make_layer_states(1);

        let mut source = AudioBuffer::new(64, 4);
        source.channel_mut(0).fill(0.5);
        let mut output = AudioBuffer::new(64, 4);

        let spatial = SpatialParams {
            location: Position3D::new(0.0, 2.0, 0.0),
            spatialization: Spatialization::Position,
            ..Default::default()
        };
        let width = pipeline
            .execute(&spatial, 0.0, 0.0, &mut states, &source, 1, 64, &mut output)
            .unwrap();
        assert_eq!(width, 2);
    }

    #[test]
    fn test_mix_node_weights() {
        let specs = vec![
            NodeSpec { id: 1, kind: NodeKind::Input, inputs: vec![] },
            NodeSpec { id: 2, kind: NodeKind::Clip, inputs: vec![1] },
            NodeSpec { id: 3, kind: NodeKind::Clamp { ceiling: 0.5 }, inputs: vec![1] },
            NodeSpec { id: 4, kind: NodeKind::Mix { weights: vec![1.0, 1.0] }, inputs: vec![2, 3] },
            NodeSpec { id: 5, kind: NodeKind::Output, inputs: vec![4] },
        ];
        let mut pipeline = Pipeline::new(specs, settings()).unwrap();
        let mut states = pipeline.make_layer_states(1);

        let mut source = AudioBuffer::new(64, 4);
        source.channel_mut(0).fill(2.0);
        let mut output = AudioBuffer::new(64, 4);

        let spatial = SpatialParams::default();
        pipeline.execute(&spatial, 0.0, 0.0, &mut states, &source, 1, 64, &mut output);
        // clip(2.0)=1.0 plus clamp(2.0, 0.5)=0.5
        assert!((output.channel(0)[0] - 1.5).abs() < 1e-6);
    }
}
