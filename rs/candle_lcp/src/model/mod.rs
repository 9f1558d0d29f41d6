pub mod aggregate;
pub mod distance_weight;
pub mod geometry;
pub mod instance_norm;
pub mod radius;
pub mod refine;

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use crate::config::LcpConfig;
use crate::model::aggregate::{aggregate_features, ChannelProjector};
use crate::model::distance_weight::DistanceWeighting;
use crate::model::geometry::GeometryEncoder;
use crate::model::radius::NormRadius;
use crate::model::refine::{ContextRefinement, KernelWeightFinalizer};

/// Neighbor coordinates relative to their support point.
///
/// `points` [B, D, N, K] minus `support_points` [B, D, N] broadcast over K.
pub fn relative_coords(points: &Tensor, support_points: &Tensor) -> Result<Tensor> {
    points.broadcast_sub(&support_points.unsqueeze(3)?)
}

/// Euclidean length of relative coordinates [B, D, N, K] -> [B, N, K].
///
/// Computed on a detached copy: no gradient flows from the distance-based
/// terms (radius, neighbor weighting) back into the coordinates.
pub fn neighbor_distances(pts: &Tensor) -> Result<Tensor> {
    pts.detach().sqr()?.sum(1)?.sqrt()
}

/// Result of one convolution call
#[derive(Debug, Clone)]
pub struct LcpOutput {
    /// Output features [B, Cout, N]
    pub features: Tensor,
    /// Support points, passed through unchanged for the next layer
    pub support_points: Tensor,
    /// Radius to commit for the next call (unchanged outside training)
    pub norm_radius: NormRadius,
}

/// LightConvPoint convolution layer
///
/// Kernel weights are generated per neighbor from its position relative to
/// the support point, then used to aggregate the neighbor features:
///
/// ```text
/// pts / radius -> GeometryEncoder -> ContextRefinement -> KernelWeightFinalizer -> mat
/// aggregate(input, mat) -> ChannelProjector -> features
/// ```
///
/// The layer holds no mutable state; the normalization radius is passed in and
/// returned by [`Lcp::forward`].
#[derive(Debug, Clone)]
pub struct Lcp {
    config: LcpConfig,
    distance_weighting: DistanceWeighting,
    encoder: GeometryEncoder,
    refinement: ContextRefinement,
    finalizer: KernelWeightFinalizer,
    projector: ChannelProjector,
}

impl Lcp {
    /// Load a layer from weights
    ///
    /// Weight paths: cv.*, alpha, beta, fc1.weight, fc2.weight, fc3.weight,
    /// bn1.*, bn2.*. The running radius is stored separately as `norm_radius`,
    /// see [`NormRadius::load`].
    pub fn load(vb: VarBuilder, config: &LcpConfig) -> Result<Self> {
        config.validate()?;

        let distance_weighting = DistanceWeighting::load(vb.clone())?;
        let encoder = GeometryEncoder::load(vb.clone(), config.dim, config.kernel_size)?;
        let refinement =
            ContextRefinement::load(vb.clone(), "fc2", Some("bn2"), config.kernel_size)?;
        let finalizer = KernelWeightFinalizer::load(vb.clone(), config.kernel_size)?;
        let projector = ChannelProjector::load(
            vb.pp("cv"),
            config.in_channels,
            config.out_channels,
            config.kernel_size,
            config.bias,
        )?;

        tracing::debug!(?config, "loaded LightConvPoint layer");

        Ok(Self {
            config: config.clone(),
            distance_weighting,
            encoder,
            refinement,
            finalizer,
            projector,
        })
    }

    pub fn config(&self) -> &LcpConfig {
        &self.config
    }

    pub fn distance_weighting(&self) -> &DistanceWeighting {
        &self.distance_weighting
    }

    /// Normalized neighbor importance [B, 1, N, K] from distances [B, N, K]
    pub fn distance_weight(&self, distances: &Tensor) -> Result<Tensor> {
        self.distance_weighting.forward(distances)
    }

    /// Generate the dynamic kernel [B, M, N, K]
    ///
    /// # Arguments
    /// * `pts` - relative coordinates already divided by the radius [B, D, N, K]
    /// * `distance_weight` - [B, 1, N, K]
    pub fn kernel_weights(&self, pts: &Tensor, distance_weight: &Tensor) -> Result<Tensor> {
        let mat = self.encoder.forward(pts)?;
        let mat = self.refinement.forward(&mat, distance_weight)?;
        self.finalizer.forward(&mat, distance_weight)
    }

    /// # Arguments
    /// * `input` - neighbor features [B, Cin, N, K]
    /// * `points` - neighbor coordinates [B, D, N, K]
    /// * `support_points` - support point coordinates [B, D, N]
    /// * `norm_radius` - current normalization radius
    /// * `train` - update the radius from this batch
    pub fn forward(
        &self,
        input: &Tensor,
        points: &Tensor,
        support_points: &Tensor,
        norm_radius: NormRadius,
        train: bool,
    ) -> Result<LcpOutput> {
        self.check_shapes(input, points, support_points)?;

        // Live view for the encoder, detached view for everything distance based
        let pts = relative_coords(points, support_points)?;
        let distances = neighbor_distances(&pts)?;

        let norm_radius = if train {
            norm_radius.observe(&distances)?
        } else {
            norm_radius
        };
        let pts = (pts / norm_radius.value())?;

        let distance_weight = self.distance_weight(&distances)?;
        let mat = self.kernel_weights(&pts, &distance_weight)?;

        let features = aggregate_features(input, &mat)?;
        let features = self.projector.forward(&features)?;

        Ok(LcpOutput {
            features,
            support_points: support_points.clone(),
            norm_radius,
        })
    }

    fn check_shapes(&self, input: &Tensor, points: &Tensor, support_points: &Tensor) -> Result<()> {
        let (b, c_in, n, k) = input.dims4()?;
        let (pb, dim, pn, pk) = points.dims4()?;
        let (sb, sdim, sn) = support_points.dims3()?;

        if c_in != self.config.in_channels {
            candle_core::bail!(
                "expected {} input channels, got input of shape {:?}",
                self.config.in_channels,
                input.dims()
            );
        }
        if dim != self.config.dim || sdim != self.config.dim {
            candle_core::bail!(
                "expected {}D coordinates, got points {:?} and support points {:?}",
                self.config.dim,
                points.dims(),
                support_points.dims()
            );
        }
        if (pb, pn, pk) != (b, n, k) || (sb, sn) != (b, n) {
            candle_core::bail!(
                "shape mismatch: input {:?}, points {:?}, support points {:?}",
                input.dims(),
                points.dims(),
                support_points.dims()
            );
        }
        Ok(())
    }
}
