mod builder;
mod config;
mod error;
mod grid;
mod migrate;
mod model;
mod normalize;
mod pipeline;
mod util;

extern crate nalgebra as na;

use crate::config::GridConfig;
use crate::grid::GridKind;
use crate::model::ExtentDefaults;

use structopt::StructOpt;

type Scalar = f64;
type Vec3 = na::Vector3<Scalar>;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "dustgrid",
    about = "Generate and maintain binary input grids for Monte-Carlo radiative transfer"
)]
struct Opt {
    /// Model the grid is built from: disk, sphere, or snapshot.
    model_name: String,
    /// The grid file to write (or to migrate in place).
    grid_filename: std::path::PathBuf,

    #[structopt(long = "grid_type", help = "octree, spherical, or cylindrical")]
    grid_type: Option<GridKind>,
    #[structopt(long = "max_tree_level")]
    max_tree_level: Option<u32>,
    #[structopt(long = "gas_mass", help = "Total gas mass target in kg")]
    gas_mass: Option<Scalar>,
    #[structopt(long = "sidelength", help = "Octree cube side length in m")]
    sidelength: Option<Scalar>,
    #[structopt(long = "inner_radius")]
    inner_radius: Option<Scalar>,
    #[structopt(long = "outer_radius")]
    outer_radius: Option<Scalar>,
    #[structopt(long = "z_max")]
    z_max: Option<Scalar>,
    #[structopt(long = "n_r")]
    n_r: Option<usize>,
    #[structopt(long = "n_ph")]
    n_ph: Option<usize>,
    #[structopt(long = "n_th")]
    n_th: Option<usize>,
    #[structopt(long = "n_z")]
    n_z: Option<usize>,
    #[structopt(long = "sf_r")]
    sf_r: Option<Scalar>,
    #[structopt(long = "sf_ph")]
    sf_ph: Option<Scalar>,
    #[structopt(long = "sf_th")]
    sf_th: Option<Scalar>,
    #[structopt(long = "sf_z")]
    sf_z: Option<Scalar>,
    #[structopt(
        long = "split_first_cell",
        help = "Split the innermost radial cell into this many sub-shells"
    )]
    split_first_cell: Option<usize>,
    #[structopt(
        long = "extra_parameter",
        help = "Free-form model argument (snapshot path for the snapshot model)"
    )]
    extra_parameter: Option<String>,
    #[structopt(
        long = "align_radius",
        help = "Uniform grain-alignment radius written to every cell, m"
    )]
    align_radius: Option<Scalar>,
    #[structopt(long = "model_file", help = "JSON file with model parameter overrides")]
    model_file: Option<std::path::PathBuf>,

    /// Lift the grid file to the current format revision instead of generating.
    #[structopt(long)]
    update: bool,
    /// Take the grid file back to the previous format revision instead of generating.
    #[structopt(long)]
    revert: bool,
    /// Set the grain-alignment radius of every cell in an existing grid, m.
    #[structopt(long = "set_align")]
    set_align: Option<Scalar>,
    /// Print a summary of an existing grid file.
    #[structopt(long)]
    info: bool,
}

impl Opt {
    fn extent_overrides(&self) -> ExtentDefaults {
        ExtentDefaults {
            grid_type: self.grid_type,
            max_tree_level: self.max_tree_level,
            sidelength: self.sidelength,
            inner_radius: self.inner_radius,
            outer_radius: self.outer_radius,
            z_max: self.z_max,
            n_r: self.n_r,
            n_ph: self.n_ph,
            n_th: self.n_th,
            n_z: self.n_z,
            sf_r: self.sf_r,
            sf_ph: self.sf_ph,
            sf_th: self.sf_th,
            sf_z: self.sf_z,
            split_first_cell: self.split_first_cell,
        }
    }
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let opt = Opt::from_args();

    let modes = [opt.update, opt.revert, opt.set_align.is_some(), opt.info]
        .iter()
        .filter(|&&on| on)
        .count();
    if modes > 1 {
        return Err(eyre::eyre!(
            "--update, --revert, --set_align and --info are mutually exclusive"
        ));
    }

    if opt.update {
        pipeline::update_grid(&opt.grid_filename)?;
    } else if opt.revert {
        pipeline::revert_grid(&opt.grid_filename)?;
    } else if let Some(radius) = opt.set_align {
        pipeline::set_align_radius(&opt.grid_filename, radius)?;
    } else if opt.info {
        pipeline::print_info(&opt.grid_filename, &mut std::io::stdout().lock())?;
    } else {
        use eyre::WrapErr;

        let params = config::load_model_params(opt.model_file.as_deref())
            .wrap_err("could not load the model parameter file")?;
        let model = model::by_name(&opt.model_name, &params, opt.extra_parameter.as_deref())?;
        let cfg = GridConfig::resolve(
            &opt.extent_overrides(),
            &model.extent_defaults(),
            opt.gas_mass,
            opt.align_radius,
        )?;
        pipeline::generate(model.as_ref(), &cfg, &opt.grid_filename)
            .wrap_err("grid generation failed")?;
    }

    Ok(())
}
