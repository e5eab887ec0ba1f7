pub mod collection;
pub mod recipe;

pub use collection::{Collection, CollectionKind};
pub use recipe::{Recipe, RecipeDetail, RecipePhoto, RecipeRef, RecipeState};
