pub mod dbrooms;
